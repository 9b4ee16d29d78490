//! Terminal display
//!
//! An append-only view of the conversation. Streaming updates to the newest
//! row are printed in place; changes to older rows are printed as a fresh
//! copy of the row.

use crate::expression::Expression;
use crate::memory::transcript::prefixed;
use crate::runtime::RenderPort;
use crossterm::style::Stylize;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

struct Row {
    name: String,
    content: String,
}

struct Screen<W> {
    out: W,
    rows: BTreeMap<u64, Row>,
    /// Row whose text is on the current, unterminated line, and how much of
    /// it has been printed.
    live: Option<(u64, String)>,
}

impl<W: Write> Screen<W> {
    fn end_live_line(&mut self) -> std::io::Result<()> {
        if self.live.take().is_some() {
            writeln!(self.out)?;
        }
        Ok(())
    }

    fn print_row(&mut self, index: u64, name: &str, content: &str) -> std::io::Result<()> {
        self.end_live_line()?;
        write!(
            self.out,
            "{} {} {}",
            format!("#{index}").dark_grey(),
            format!("[{name}:]").bold(),
            content
        )?;
        self.live = Some((index, content.to_string()));
        self.out.flush()
    }

    fn note(&mut self, text: &str) -> std::io::Result<()> {
        self.end_live_line()?;
        writeln!(self.out, "{}", text.dark_grey())?;
        self.out.flush()
    }
}

pub struct TerminalRenderer<W> {
    screen: Mutex<Screen<W>>,
}

impl TerminalRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            screen: Mutex::new(Screen {
                out,
                rows: BTreeMap::new(),
                live: None,
            }),
        }
    }

    /// Terminate a pending streamed line, e.g. before printing a prompt.
    pub fn finish_line(&self) {
        let mut screen = self.lock();
        if let Err(e) = screen.end_live_line() {
            tracing::debug!(error = %e, "Terminal write failed");
        }
    }

    fn with_screen(&self, f: impl FnOnce(&mut Screen<W>) -> std::io::Result<()>) {
        let mut screen = self.lock();
        if let Err(e) = f(&mut screen) {
            tracing::debug!(error = %e, "Terminal write failed");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Screen<W>> {
        self.screen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> RenderPort for TerminalRenderer<W> {
    fn render_turn(&self, display_name: &str, text: &str, index: u64) {
        self.with_screen(|screen| {
            screen.rows.insert(
                index,
                Row {
                    name: display_name.to_string(),
                    content: text.to_string(),
                },
            );
            screen.print_row(index, display_name, text)
        });
    }

    fn update_turn(&self, index: u64, text: &str) {
        self.with_screen(|screen| {
            let Some(row) = screen.rows.get_mut(&index) else {
                return Ok(());
            };
            if row.content == text {
                return Ok(());
            }
            row.content = text.to_string();
            let name = row.name.clone();

            let suffix = match &screen.live {
                Some((live, printed)) if *live == index => {
                    text.strip_prefix(printed.as_str()).map(str::to_string)
                }
                _ => None,
            };
            match suffix {
                Some(suffix) => {
                    write!(screen.out, "{suffix}")?;
                    screen.live = Some((index, text.to_string()));
                    screen.out.flush()
                }
                None => screen.print_row(index, &name, text),
            }
        });
    }

    fn remove_turn(&self, index: u64) {
        self.with_screen(|screen| {
            if screen.rows.remove(&index).is_none() {
                return Ok(());
            }
            screen.note(&format!("(#{index} removed)"))
        });
    }

    fn rendered_turns(&self) -> Vec<(u64, String)> {
        self.lock()
            .rows
            .iter()
            .map(|(index, row)| (*index, prefixed(&row.name, &row.content)))
            .collect()
    }

    fn clear(&self) {
        self.with_screen(|screen| {
            screen.rows.clear();
            screen.live = None;
            crossterm::execute!(
                screen.out,
                crossterm::terminal::Clear(crossterm::terminal::ClearType::All),
                crossterm::cursor::MoveTo(0, 0)
            )
        });
    }

    fn show_expression(&self, expression: Expression) {
        self.with_screen(|screen| {
            screen.end_live_line()?;
            writeln!(screen.out, "  {}", expression.to_string().italic().magenta())?;
            screen.out.flush()
        });
    }
}
