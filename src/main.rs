// SPDX-License-Identifier: MIT
//
// rawcon — demo driver for rawcon-term.
//
// Wires a `Console` into an `EventLoop`:
//
//   SIGWINCH      → redraw (size and cursor position are re-queried)
//   SIGINT        → quit
//   1 s interval  → uptime clock
//   stdin         → echo the key, `q` quits
//
// The console is shared between callbacks through `Rc<RefCell<_>>`. That
// is enough because every callback runs on this one thread and none of
// them re-enters another.
//
// Layout:
//
//   row 2   size banner
//   row 4   help text
//   row 7   cursor position seen at draw time
//   row 9   uptime
//   row 11  last key

use std::cell::RefCell;
use std::io;
use std::process;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rawcon_term::ansi::{Attr, ClearRange};
use rawcon_term::{
    CallbackResult, ColorCode, Config, Console, EventLoop, Position, PrintOptions, Registry,
};

const BANNER_ROW: u16 = 2;
const HELP_ROW: u16 = 4;
const CURSOR_ROW: u16 = 7;
const CLOCK_ROW: u16 = 9;
const KEY_ROW: u16 = 11;
const MARGIN: u16 = 2;

// ─── Drawing ────────────────────────────────────────────────────────────────

fn draw(console: &mut Console) -> io::Result<()> {
    let size = console.size();

    console.set_background(ColorCode::BLUE)?;
    console.set_foreground(ColorCode::WHITE)?;
    console.clear_screen(ClearRange::All)?;
    console.cursor_home()?;

    console.set_attrs(Attr::BOLD, true)?;
    console.print(
        &format!(" {size} "),
        &PrintOptions::default()
            .at(Position::new(MARGIN, BANNER_ROW))
            .foreground(ColorCode::rgb(255, 64, 255))
            .background(ColorCode::rgb(0, 255, 0))
            .terminator(""),
    )?;
    console.set_attrs(Attr::BOLD, false)?;

    console.print(
        "q or Ctrl-C quits\nresize the window to redraw",
        &PrintOptions::default()
            .at(Position::new(MARGIN, HELP_ROW))
            .foreground(ColorCode::WHITE)
            .background(ColorCode::BLUE),
    )?;

    let pos = console.position();
    console.print(
        &format!("cursor was at {pos}"),
        &PrintOptions::default()
            .at(Position::new(MARGIN, CURSOR_ROW))
            .foreground(ColorCode::from_unit_rgb(1.0, 1.0, 0.5)),
    )?;
    console.set_foreground(ColorCode::WHITE)
}

fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// Write `text` on `row`, leaving the cursor where it was.
fn status_line(console: &mut Console, row: u16, text: &str) -> io::Result<()> {
    console.save_cursor()?;
    console.set_position(Position::new(MARGIN, row))?;
    console.clear_line(ClearRange::ToEnd)?;
    console.print(text, &PrintOptions::default().terminator(""))?;
    console.restore_cursor()
}

fn handle_key(console: &mut Console, registry: &mut Registry) -> CallbackResult {
    match console.read_char()? {
        Some('q') => {
            log::info!("quit key");
            registry.quit();
        }
        Some(ch) => status_line(console, KEY_ROW, &format!("key: {ch:?}"))?,
        None => {
            // Readable but empty: the terminal hung up.
            log::info!("stdin closed");
            registry.quit();
        }
    }
    Ok(())
}

/// Keys typed while `draw` was querying the cursor arrive with the reply,
/// and stdin will not poll readable for them again.
fn drain_held_keys(console: &mut Console, registry: &mut Registry) -> CallbackResult {
    while console.has_pending_input() && !registry.quit_requested() {
        handle_key(console, registry)?;
    }
    Ok(())
}

fn on_key(console: &mut Console, registry: &mut Registry) -> CallbackResult {
    handle_key(console, registry)?;
    drain_held_keys(console, registry)
}

// ─── Main ───────────────────────────────────────────────────────────────────

/// Not a terminal: say so plainly, without any escape sequences.
fn run_plain(mut console: Console) -> rawcon_term::Result<()> {
    let size = console.size();
    let pos = console.position();
    console.println("rawcon: not a capable terminal, nothing to draw")?;
    console.println(&format!("size {size}, cursor {pos}"))?;
    Ok(())
}

fn run() -> rawcon_term::Result<()> {
    let config = Config::from_env();
    let console = Console::stdio(&config)?;
    if !console.is_tty() {
        return run_plain(console);
    }

    let input_fd = console.input_fd();
    let console = Rc::new(RefCell::new(console));
    draw(&mut console.borrow_mut())?;

    let mut event_loop = EventLoop::new();
    let registry = event_loop.registry();

    registry.add_signal(libc::SIGINT, |r| {
        log::info!("interrupted");
        r.quit();
        Ok(())
    })?;

    let c = Rc::clone(&console);
    registry.add_signal(libc::SIGWINCH, move |r| {
        let mut console = c.borrow_mut();
        draw(&mut console)?;
        drain_held_keys(&mut console, r)
    })?;

    let c = Rc::clone(&console);
    let started = Instant::now();
    registry.add_interval(Duration::from_secs(1), move |_| {
        let text = format!("up {}", format_uptime(started.elapsed()));
        status_line(&mut c.borrow_mut(), CLOCK_ROW, &text)?;
        Ok(())
    })?;

    let c = Rc::clone(&console);
    registry.add_readable(input_fd, move |r| on_key(&mut c.borrow_mut(), r))?;

    // Whatever was typed during the first draw.
    let c = Rc::clone(&console);
    registry.add_timeout(Duration::ZERO, move |r| drain_held_keys(&mut c.borrow_mut(), r))?;

    event_loop.run()?;

    let mut console = console.borrow_mut();
    console.reset()?;
    console.clear_screen(ClearRange::All)?;
    console.cursor_home()?;
    console.show_cursor()?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(e) = run() {
        eprintln!("rawcon: {e}");
        process::exit(1);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_format() {
        assert_eq!(format_uptime(Duration::ZERO), "00:00:00");
        assert_eq!(format_uptime(Duration::from_secs(59)), "00:00:59");
        assert_eq!(format_uptime(Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_uptime(Duration::from_secs(3 * 3600 + 25 * 60 + 7)), "03:25:07");
    }

    #[test]
    fn uptime_ignores_subsecond() {
        assert_eq!(format_uptime(Duration::from_millis(1999)), "00:00:01");
    }

    #[test]
    fn layout_rows_do_not_overlap() {
        let rows = [BANNER_ROW, HELP_ROW, HELP_ROW + 1, CURSOR_ROW, CLOCK_ROW, KEY_ROW];
        assert!(rows.windows(2).all(|w| w[0] < w[1]));
    }
}
