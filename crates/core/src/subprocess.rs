use std::io::{self, Read};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Like `Command::output`, but the child is killed once `limit` elapses.
pub(crate) fn output_within(command: &mut Command, limit: Option<Duration>) -> io::Result<Output> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = limit.map(|limit| Instant::now() + limit);

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let (Some(deadline), Some(limit)) = (deadline, limit) {
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "{} timed out after {:.1}s",
                        command.get_program().to_string_lossy(),
                        limit.as_secs_f32()
                    ),
                ));
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(Output {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buffer);
        }
        buffer
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn finished_child_output_is_captured() -> io::Result<()> {
        let output = output_within(
            Command::new("sh").args(["-c", "echo Rotate: 90; echo warn >&2"]),
            Some(Duration::from_secs(10)),
        )?;
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "Rotate: 90\n");
        assert_eq!(String::from_utf8_lossy(&output.stderr), "warn\n");
        Ok(())
    }

    #[test]
    fn slow_child_is_killed_at_the_deadline() {
        let started = Instant::now();
        let result = output_within(
            Command::new("sleep").arg("5"),
            Some(Duration::from_millis(100)),
        );

        let error = result.err().map(|error| error.kind());
        assert_eq!(error, Some(io::ErrorKind::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_binary_fails_to_spawn() {
        let result = output_within(&mut Command::new("unichunk-no-such-binary"), None);
        assert_eq!(result.err().map(|e| e.kind()), Some(io::ErrorKind::NotFound));
    }
}
