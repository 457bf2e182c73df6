//! Word, table and image detection from a page's content stream.
//!
//! Glyph widths are not read from font programs: every glyph advances half an
//! em, which keeps word boxes approximate but consistent with each other.

use crate::document::{number, ContentView};
use crate::models::{BoundingBox, Element};
use lopdf::content::Operation;
use lopdf::Object;
use std::collections::HashMap;

const GLYPH_WIDTH_EM: f32 = 0.5;
const WORD_GAP_EM: f32 = 0.15;
const CELL_GAP_EM: f32 = 1.5;
const COLUMN_TOLERANCE_EM: f32 = 1.0;

type Matrix = [f32; 6];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 1.0, 0.0, 0.0];

fn multiply(left: &Matrix, right: &Matrix) -> Matrix {
    [
        left[0] * right[0] + left[1] * right[2],
        left[0] * right[1] + left[1] * right[3],
        left[2] * right[0] + left[3] * right[2],
        left[2] * right[1] + left[3] * right[3],
        left[4] * right[0] + left[5] * right[2] + right[4],
        left[4] * right[1] + left[5] * right[3] + right[5],
    ]
}

fn translate(tx: f32, ty: f32) -> Matrix {
    [1.0, 0.0, 0.0, 1.0, tx, ty]
}

fn apply(matrix: &Matrix, x: f32, y: f32) -> (f32, f32) {
    (
        x * matrix[0] + y * matrix[2] + matrix[4],
        x * matrix[1] + y * matrix[3] + matrix[5],
    )
}

fn matrix_operand(operands: &[Object]) -> Option<Matrix> {
    let values: Vec<f32> = operands.iter().filter_map(number).collect();
    match values.as_slice() {
        [a, b, c, d, e, f] => Some([*a, *b, *c, *d, *e, *f]),
        _ => None,
    }
}

fn decode_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    bytes
        .iter()
        .map(|byte| {
            let c = char::from(*byte);
            if c.is_control() {
                ' '
            } else {
                c
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Word {
    text: String,
    x0: f32,
    x1: f32,
    baseline: f32,
    size: f32,
}

#[derive(Debug, Default)]
struct PageScan {
    words: Vec<Word>,
    images: Vec<(String, BoundingBox)>,
}

struct Interpreter<'a> {
    view: &'a ContentView,
    ctm: Matrix,
    saved: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    leading: f32,
    pending: Option<Word>,
    scan: PageScan,
}

impl<'a> Interpreter<'a> {
    fn new(view: &'a ContentView) -> Self {
        Self {
            view,
            ctm: IDENTITY,
            saved: Vec::new(),
            tm: IDENTITY,
            tlm: IDENTITY,
            font_size: 12.0,
            leading: 0.0,
            pending: None,
            scan: PageScan::default(),
        }
    }

    fn run(mut self, operations: &[Operation]) -> PageScan {
        for operation in operations {
            self.step(operation);
        }
        self.flush_word();
        self.scan
    }

    fn step(&mut self, operation: &Operation) {
        let operands = &operation.operands;
        match operation.operator.as_str() {
            "q" => self.saved.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.saved.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    self.ctm = multiply(&matrix, &self.ctm);
                }
            }
            "BT" => {
                self.tm = IDENTITY;
                self.tlm = IDENTITY;
            }
            "ET" => self.flush_word(),
            "Tf" => {
                if let Some(size) = operands.get(1).and_then(number) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = operands.first().and_then(number) {
                    self.leading = leading;
                }
            }
            "Td" => self.move_line(operands),
            "TD" => {
                if let Some(ty) = operands.get(1).and_then(number) {
                    self.leading = -ty;
                }
                self.move_line(operands);
            }
            "Tm" => {
                if let Some(matrix) = matrix_operand(operands) {
                    self.tm = matrix;
                    self.tlm = matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => self.show_operand(operands.first()),
            "'" => {
                self.next_line();
                self.show_operand(operands.first());
            }
            "\"" => {
                self.next_line();
                self.show_operand(operands.get(2));
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    for item in items {
                        match item {
                            Object::String(bytes, _) => self.show(&decode_string(bytes)),
                            other => {
                                if let Some(adjustment) = number(other) {
                                    let shift = -adjustment / 1000.0 * self.font_size;
                                    self.tm = multiply(&translate(shift, 0.0), &self.tm);
                                }
                            }
                        }
                    }
                }
            }
            "Do" => self.place_xobject(operands.first()),
            _ => {}
        }
    }

    fn move_line(&mut self, operands: &[Object]) {
        let tx = operands.first().and_then(number).unwrap_or(0.0);
        let ty = operands.get(1).and_then(number).unwrap_or(0.0);
        self.tlm = multiply(&translate(tx, ty), &self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.tlm = multiply(&translate(0.0, -self.leading), &self.tlm);
        self.tm = self.tlm;
    }

    fn show_operand(&mut self, operand: Option<&Object>) {
        if let Some(Object::String(bytes, _)) = operand {
            self.show(&decode_string(bytes));
        }
    }

    fn show(&mut self, text: &str) {
        for glyph in text.chars() {
            let rendering = multiply(&self.tm, &self.ctm);
            let (x, y) = apply(&rendering, 0.0, 0.0);
            let scale = rendering[2].hypot(rendering[3]).max(f32::EPSILON);
            let size = self.font_size * scale;
            let width = size * GLYPH_WIDTH_EM;

            if glyph.is_whitespace() {
                self.flush_word();
            } else {
                self.push_glyph(glyph, x, y, width, size);
            }

            let advance = self.font_size * GLYPH_WIDTH_EM;
            self.tm = multiply(&translate(advance, 0.0), &self.tm);
        }
    }

    fn push_glyph(&mut self, glyph: char, x: f32, y: f32, width: f32, size: f32) {
        if let Some(word) = &mut self.pending {
            let same_line = (word.baseline - y).abs() <= word.size * 0.5;
            let adjacent = (x - word.x1).abs() <= word.size * WORD_GAP_EM;
            if same_line && adjacent {
                word.text.push(glyph);
                word.x1 = x + width;
                return;
            }
        }

        self.flush_word();
        self.pending = Some(Word {
            text: glyph.to_string(),
            x0: x,
            x1: x + width,
            baseline: y,
            size,
        });
    }

    fn flush_word(&mut self) {
        if let Some(word) = self.pending.take() {
            self.scan.words.push(word);
        }
    }

    fn place_xobject(&mut self, operand: Option<&Object>) {
        let Some(Object::Name(name)) = operand else {
            return;
        };
        let name = String::from_utf8_lossy(name).to_string();
        if !self.view.image_names.contains(&name) {
            return;
        }

        let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
            .map(|(x, y)| apply(&self.ctm, x, y));
        let x0 = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
        let x1 = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
        let y0 = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
        let y1 = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

        let bbox = to_top_left(self.view, x0, y0, x1, y1);
        self.scan.images.push((name, bbox));
    }
}

fn to_top_left(view: &ContentView, x0: f32, y0: f32, x1: f32, y1: f32) -> BoundingBox {
    let left = view.media_box[0].min(view.media_box[2]);
    let bottom = view.media_box[1].min(view.media_box[3]);
    let height = view.height();
    BoundingBox::new(
        x0 - left,
        height - (y1 - bottom),
        x1 - left,
        height - (y0 - bottom),
    )
}

fn word_bbox(view: &ContentView, word: &Word) -> BoundingBox {
    to_top_left(view, word.x0, word.baseline, word.x1, word.baseline + word.size)
}

fn lines_of(words: &[Word]) -> Vec<Vec<&Word>> {
    let mut sorted: Vec<&Word> = words.iter().collect();
    sorted.sort_by(|left, right| {
        right
            .baseline
            .total_cmp(&left.baseline)
            .then(left.x0.total_cmp(&right.x0))
    });

    let mut lines: Vec<Vec<&Word>> = Vec::new();
    for word in sorted {
        match lines.last_mut() {
            Some(line) if (line[0].baseline - word.baseline).abs() <= line[0].size * 0.5 => {
                line.push(word)
            }
            _ => lines.push(vec![word]),
        }
    }

    for line in &mut lines {
        line.sort_by(|left, right| left.x0.total_cmp(&right.x0));
    }
    lines
}

fn cells_of<'w>(line: &[&'w Word]) -> Vec<Vec<&'w Word>> {
    let mut cells: Vec<Vec<&Word>> = Vec::new();
    for &word in line {
        match cells.last_mut() {
            Some(cell)
                if word.x0 - cell[cell.len() - 1].x1 <= word.size * CELL_GAP_EM =>
            {
                cell.push(word)
            }
            _ => cells.push(vec![word]),
        }
    }
    cells
}

fn columns_align(reference: &[Vec<&Word>], candidate: &[Vec<&Word>]) -> bool {
    reference.len() == candidate.len()
        && reference.iter().zip(candidate).all(|(left, right)| {
            (left[0].x0 - right[0].x0).abs() <= left[0].size * COLUMN_TOLERANCE_EM
        })
}

fn detect_tables(view: &ContentView, words: &[Word]) -> Vec<Element> {
    let rows: Vec<Vec<Vec<&Word>>> = lines_of(words).iter().map(|line| cells_of(line)).collect();

    let mut tables = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        if rows[start].len() < 2 {
            start += 1;
            continue;
        }

        let mut end = start + 1;
        while end < rows.len() && columns_align(&rows[start], &rows[end]) {
            end += 1;
        }

        if end - start >= 2 {
            tables.push(table_element(view, &rows[start..end]));
        }
        start = end;
    }

    tables
}

fn table_element(view: &ContentView, rows: &[Vec<Vec<&Word>>]) -> Element {
    let mut bbox: Option<BoundingBox> = None;
    let grid: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| {
                    for word in cell {
                        let word_box = word_bbox(view, word);
                        bbox = Some(bbox.map_or(word_box, |current| current.union(&word_box)));
                    }
                    cell.iter()
                        .map(|word| word.text.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Element::Table { bbox, rows: grid }
}

pub fn parse_content(view: &ContentView) -> Vec<Element> {
    let scan = Interpreter::new(view).run(&view.operations);

    let mut elements: Vec<Element> = scan
        .words
        .iter()
        .map(|word| Element::Text {
            bbox: Some(word_bbox(view, word)),
            text: word.text.clone(),
        })
        .collect();
    elements.extend(detect_tables(view, &scan.words));
    elements.extend(scan.images.into_iter().map(|(name, bbox)| Element::Image {
        bbox: Some(bbox),
        name,
    }));
    elements
}

pub fn image_placements(view: &ContentView) -> HashMap<String, BoundingBox> {
    let scan = Interpreter::new(view).run(&view.operations);
    let mut placements = HashMap::new();
    for (name, bbox) in scan.images {
        placements.entry(name).or_insert(bbox);
    }
    placements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementKind;
    use std::collections::HashSet;

    fn op(operator: &str, operands: Vec<Object>) -> Operation {
        Operation::new(operator, operands)
    }

    fn text(value: &str) -> Object {
        Object::string_literal(value)
    }

    fn view(operations: Vec<Operation>, images: &[&str]) -> ContentView {
        ContentView {
            media_box: [0.0, 0.0, 612.0, 792.0],
            operations,
            image_names: images.iter().map(|name| name.to_string()).collect::<HashSet<_>>(),
        }
    }

    #[test]
    fn words_get_top_left_boxes() {
        let page = view(
            vec![
                op("BT", vec![]),
                op("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
                op("Td", vec![Object::Integer(72), Object::Integer(700)]),
                op("Tj", vec![text("Hello world")]),
                op("ET", vec![]),
            ],
            &[],
        );

        let elements = parse_content(&page);
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].text(), Some("Hello"));
        assert_eq!(elements[1].text(), Some("world"));

        let hello = elements[0].bbox().unwrap();
        assert_eq!(hello.x0, 72.0);
        assert_eq!(hello.x1, 97.0);
        assert_eq!(hello.y0, 82.0);
        assert_eq!(hello.y1, 92.0);

        let world = elements[1].bbox().unwrap();
        assert_eq!(world.x0, 102.0);
    }

    #[test]
    fn kerned_pieces_form_one_word() {
        let page = view(
            vec![
                op("BT", vec![]),
                op("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
                op(
                    "TJ",
                    vec![Object::Array(vec![
                        text("Pre"),
                        Object::Integer(20),
                        text("ssure"),
                        Object::Integer(-400),
                        text("gauge"),
                    ])],
                ),
                op("ET", vec![]),
            ],
            &[],
        );

        let words: Vec<_> = parse_content(&page)
            .into_iter()
            .filter_map(|element| element.text().map(str::to_string))
            .collect();
        assert_eq!(words, vec!["Pressure", "gauge"]);
    }

    #[test]
    fn aligned_columns_become_a_table() {
        let page = view(
            vec![
                op("BT", vec![]),
                op("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(10)]),
                op("TL", vec![Object::Integer(14)]),
                op("Td", vec![Object::Integer(50), Object::Integer(720)]),
                op("Tj", vec![text("Intro paragraph")]),
                op("Td", vec![Object::Integer(0), Object::Integer(-20)]),
                op("Tj", vec![text("Part")]),
                op("Td", vec![Object::Integer(150), Object::Integer(0)]),
                op("Tj", vec![text("Max psi")]),
                op("Td", vec![Object::Integer(-150), Object::Integer(-14)]),
                op("Tj", vec![text("Pump")]),
                op("Td", vec![Object::Integer(150), Object::Integer(0)]),
                op("Tj", vec![text("40")]),
                op("ET", vec![]),
            ],
            &[],
        );

        let elements = parse_content(&page);
        let tables: Vec<_> = elements
            .iter()
            .filter(|element| element.kind() == ElementKind::Table)
            .collect();
        assert_eq!(tables.len(), 1);

        match tables[0] {
            Element::Table { rows, bbox } => {
                assert_eq!(
                    rows,
                    &vec![
                        vec!["Part".to_string(), "Max psi".to_string()],
                        vec!["Pump".to_string(), "40".to_string()],
                    ]
                );
                let bbox = bbox.unwrap();
                assert_eq!(bbox.x0, 50.0);
            }
            other => panic!("expected a table, got {other:?}"),
        }

        // words come first, the table follows them
        assert_eq!(elements.last().map(Element::kind), Some(ElementKind::Table));
    }

    #[test]
    fn image_boxes_follow_the_ctm() {
        let page = view(
            vec![
                op("q", vec![]),
                op(
                    "cm",
                    vec![
                        Object::Integer(100),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(50),
                        Object::Integer(200),
                        Object::Integer(300),
                    ],
                ),
                op("Do", vec![Object::Name(b"Im1".to_vec())]),
                op("Q", vec![]),
                op("Do", vec![Object::Name(b"Fm0".to_vec())]),
            ],
            &["Im1"],
        );

        let elements = parse_content(&page);
        assert_eq!(elements.len(), 1);
        assert_eq!(
            elements[0],
            Element::Image {
                bbox: Some(BoundingBox::new(200.0, 442.0, 300.0, 492.0)),
                name: "Im1".to_string(),
            }
        );

        let placements = image_placements(&page);
        assert_eq!(placements.len(), 1);
        assert!(placements.contains_key("Im1"));
    }

    #[test]
    fn utf16_strings_are_decoded() {
        assert_eq!(decode_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0xE9]), "Aé");
        assert_eq!(decode_string(b"ab\x07c"), "ab c");
    }
}
