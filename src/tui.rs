use crate::models::QueryKey;
use crossterm::{
    cursor::MoveTo,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::path::Path;

const BELL: &str = "\x07";

/// Terminal progress for one crawl: a cleared screen, a page progress bar and
/// an audible cue after each page.
pub struct CrawlTUI {
    bell: bool,
    bar: Option<ProgressBar>,
}

impl CrawlTUI {
    pub fn new(bell: bool) -> Self {
        Self { bell, bar: None }
    }

    /// Clear the screen and show what is being crawled
    pub fn show_header(&mut self, query: &QueryKey, output: &Path) -> io::Result<()> {
        execute!(
            io::stdout(),
            Clear(ClearType::All),
            MoveTo(0, 0),
            SetForegroundColor(Color::White),
            Print(format!("🏠 Rumah dijual di {}\n", query)),
            SetForegroundColor(Color::DarkGrey),
            Print(format!("📁 Output: {}\n", output.display())),
            ResetColor
        )
    }

    pub fn start_pages(&mut self, total_pages: u32, visited_page: u32) {
        let bar = ProgressBar::with_draw_target(
            Some(u64::from(total_pages)),
            ProgressDrawTarget::stdout(),
        );
        let style = ProgressStyle::with_template(
            "{spinner} Pages [{bar:30}] {pos}/{len} ({elapsed}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
        bar.set_style(style);
        bar.set_position(u64::from(visited_page));
        self.bar = Some(bar);
    }

    pub fn start_page(&mut self, page: u32, total_pages: u32) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("fetching page {} of {}", page, total_pages));
        }
    }

    pub fn finish_page(&mut self, page: u32, records: usize) -> io::Result<()> {
        if let Some(bar) = &self.bar {
            bar.set_position(u64::from(page));
            bar.set_message(format!("page {}: {} listings", page, records));
        }
        self.ring()
    }

    /// Final banner naming the output file
    pub fn show_completion(&mut self, output: &Path, rows: usize) -> io::Result<()> {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }

        execute!(
            io::stdout(),
            Print("─".repeat(60)),
            Print("\n"),
            SetForegroundColor(Color::Green),
            Print("✅ FETCHING PROCESS FINISHED.\n"),
            ResetColor,
            Print(format!("   {} listings in {}\n", rows, output.display())),
            SetForegroundColor(Color::DarkGrey),
            Print("   Sort and compare them before you buy. Have a nice day!\n"),
            ResetColor
        )?;

        self.ring()
    }

    /// Leave the progress bar where it is, e.g. when the run fails
    pub fn abandon(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.abandon();
        }
    }

    fn ring(&self) -> io::Result<()> {
        if !self.bell {
            return Ok(());
        }
        let mut stdout = io::stdout();
        stdout.write_all(BELL.as_bytes())?;
        stdout.flush()
    }
}
