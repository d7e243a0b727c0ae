//! Output formatting for query results

use crate::query::types::Record;
use std::io::{self, Write};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// What is printed for each record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Raw primary record bytes
    #[default]
    Records,
    /// Primary bytes followed by the secondary record, if any
    WithSecondary,
    /// One `identifier<TAB>division` line per record
    IdsOnly,
}

/// Streams records to a terminal or buffer
pub struct RecordPrinter<W: WriteColor> {
    out: W,
    mode: OutputMode,
    printed: usize,
}

impl RecordPrinter<StandardStream> {
    pub fn stdout(mode: OutputMode, color: bool) -> Self {
        let choice = if color {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        Self::new(StandardStream::stdout(choice), mode)
    }
}

impl<W: WriteColor> RecordPrinter<W> {
    pub fn new(out: W, mode: OutputMode) -> Self {
        Self {
            out,
            mode,
            printed: 0,
        }
    }

    pub fn printed(&self) -> usize {
        self.printed
    }

    pub fn print(&mut self, record: &Record) -> io::Result<()> {
        match self.mode {
            OutputMode::IdsOnly => {
                self.out
                    .set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
                write!(self.out, "{}", record.id)?;
                self.out.reset()?;
                write!(self.out, "\t")?;
                self.out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
                writeln!(self.out, "{}", record.division)?;
                self.out.reset()?;
            }
            OutputMode::Records => {
                write_block(&mut self.out, &record.primary)?;
            }
            OutputMode::WithSecondary => {
                write_block(&mut self.out, &record.primary)?;
                if let Some(secondary) = record.secondary.as_deref() {
                    write_block(&mut self.out, secondary)?;
                }
            }
        }
        self.printed += 1;
        Ok(())
    }

    /// Trailing count line, written to the same stream
    pub fn summary(&mut self, alias: &str) -> io::Result<()> {
        self.out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
        writeln!(self.out, "-- {} record(s) from {}", self.printed, alias)?;
        self.out.reset()?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Raw bytes, terminated by a newline if they lack one
fn write_block<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    out.write_all(bytes)?;
    if !bytes.is_empty() && !bytes.ends_with(b"\n") {
        out.write_all(b"\n")?;
    }
    Ok(())
}
