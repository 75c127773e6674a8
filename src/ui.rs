// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use console::Style;
use std::cmp;
use std::io::{self, Write};

pub(crate) enum Alignment {
    Left,
    Right,
}

/// One item in a table.
pub(crate) struct Item {
    text: String,
    style: Style,
    alignment: Alignment,
}

/// A table row.
pub(crate) enum Row {
    Items(Vec<Item>),
}

/// The table
pub(crate) struct Table {
    // The header row.
    pub header: Vec<Item>,

    // The table rows.
    pub rows: Vec<Row>,
}

impl Item {
    pub(crate) fn new(text: String, style: Style) -> Self {
        Item {
            text,
            style,
            alignment: Alignment::Left,
        }
    }

    pub(crate) fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }
}

impl Table {
    pub(crate) fn new() -> Self {
        Table {
            header: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn write_row<W: Write>(writer: &mut W, row: &[Item], column_width: &[usize]) -> io::Result<()> {
        for (i, item) in row.iter().enumerate() {
            let text = match item.alignment {
                Alignment::Left => {
                    if i == row.len() - 1 {
                        item.text.clone()
                    } else {
                        format!("{:<width$}", &item.text, width = column_width[i])
                    }
                }
                Alignment::Right => format!("{:>width$}", &item.text, width = column_width[i]),
            };

            write!(writer, "{}", &item.style.apply_to(text))?;
            if i != row.len() - 1 {
                write!(writer, " ")?;
            }
        }

        writeln!(writer)?;

        Ok(())
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut column_width: Vec<usize> = self
            .header
            .iter()
            .map(|h| console::measure_text_width(&h.text))
            .collect();
        for row in &self.rows {
            let Row::Items(items) = row;
            for (i, item) in items.iter().enumerate() {
                column_width[i] = cmp::max(console::measure_text_width(&item.text), column_width[i]);
            }
        }

        Self::write_row(writer, &self.header, &column_width)?;

        for row in &self.rows {
            let Row::Items(items) = row;
            Self::write_row(writer, items, &column_width)?;
        }

        Ok(())
    }
}
