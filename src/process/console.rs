// src/process/console.rs

//! Terminal output consumers

use super::Console;
use crate::error::Result;
use nix::errno::Errno;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

const MAX_TITLE_LEN: usize = 1024;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
enum ParseState {
    #[default]
    Ground,
    Escape,
    /// Inside `ESC ]`, reading the command number
    OscCommand(String),
    /// Reading a title (`ESC ] 0 ;` or `ESC ] 2 ;`)
    Title(Vec<u8>),
    /// Saw ESC inside a title; `\` completes it
    TitleEscape(Vec<u8>),
    /// Some other OSC command; skipped up to its terminator
    OtherOsc,
}

/// Incremental scanner for xterm window title sequences
///
/// Recognizes `ESC ] 0 ; text BEL` and `ESC ] 2 ; text ESC \` across chunk
/// boundaries.
#[derive(Debug, Default)]
pub struct TitleParser {
    state: ParseState,
}

impl TitleParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed output; returns the last title completed in this chunk
    pub fn feed(&mut self, bytes: &[u8]) -> Option<String> {
        let mut title = None;
        for &b in bytes {
            if let Some(t) = self.step(b) {
                title = Some(t);
            }
        }
        title
    }

    fn step(&mut self, b: u8) -> Option<String> {
        const ESC: u8 = 0x1b;
        const BEL: u8 = 0x07;

        let state = std::mem::take(&mut self.state);
        let (next, done) = match (state, b) {
            (ParseState::Ground, ESC) => (ParseState::Escape, None),
            (ParseState::Ground, _) => (ParseState::Ground, None),

            (ParseState::Escape, b']') => (ParseState::OscCommand(String::new()), None),
            (ParseState::Escape, ESC) => (ParseState::Escape, None),
            (ParseState::Escape, _) => (ParseState::Ground, None),

            (ParseState::OscCommand(num), b';') if num == "0" || num == "2" => {
                (ParseState::Title(Vec::new()), None)
            }
            (ParseState::OscCommand(_), b';') => (ParseState::OtherOsc, None),
            (ParseState::OscCommand(mut num), d) if d.is_ascii_digit() && num.len() < 4 => {
                num.push(d as char);
                (ParseState::OscCommand(num), None)
            }
            (ParseState::OscCommand(_), ESC) => (ParseState::Escape, None),
            (ParseState::OscCommand(_), _) => (ParseState::Ground, None),

            (ParseState::Title(text), BEL) => (ParseState::Ground, Some(text)),
            (ParseState::Title(text), ESC) => (ParseState::TitleEscape(text), None),
            (ParseState::Title(mut text), c) => {
                if text.len() < MAX_TITLE_LEN {
                    text.push(c);
                }
                (ParseState::Title(text), None)
            }

            (ParseState::TitleEscape(text), b'\\') => (ParseState::Ground, Some(text)),
            (ParseState::TitleEscape(_), b']') => (ParseState::OscCommand(String::new()), None),
            (ParseState::TitleEscape(_), _) => (ParseState::Ground, None),

            (ParseState::OtherOsc, BEL) => (ParseState::Ground, None),
            (ParseState::OtherOsc, ESC) => (ParseState::Escape, None),
            (ParseState::OtherOsc, _) => (ParseState::OtherOsc, None),
        };

        self.state = next;
        done.map(|text| String::from_utf8_lossy(&text).into_owned())
    }
}

/// Console copying pty output to a sink and tracking the window title
pub struct PtyConsole {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    title: Arc<Mutex<Option<String>>>,
}

impl PtyConsole {
    /// Console echoing to stdout
    pub fn new() -> Self {
        Self::with_sink(Box::new(io::stdout()))
    }

    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            title: Arc::new(Mutex::new(None)),
        }
    }
}

impl Default for PtyConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for PtyConsole {
    fn attach_terminal(&self, terminal: OwnedFd) -> Result<()> {
        *self.title.lock() = None;
        let sink = self.sink.clone();
        let title = self.title.clone();
        spawn_reader(terminal, move |chunk, parser| {
            if let Some(t) = parser.feed(chunk) {
                *title.lock() = Some(t);
            }
            let mut sink = sink.lock();
            sink.write_all(chunk).and_then(|_| sink.flush())
        })
    }

    fn window_title(&self) -> Option<String> {
        self.title.lock().clone()
    }
}

/// Console discarding all output
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConsole;

impl Console for NullConsole {
    fn attach_terminal(&self, terminal: OwnedFd) -> Result<()> {
        spawn_reader(terminal, |_, _| Ok(()))
    }

    fn window_title(&self) -> Option<String> {
        None
    }
}

/// Drain a terminal on a background thread until the other side closes
fn spawn_reader<F>(terminal: OwnedFd, mut on_chunk: F) -> Result<()>
where
    F: FnMut(&[u8], &mut TitleParser) -> io::Result<()> + Send + 'static,
{
    let mut file = File::from(terminal);
    thread::Builder::new()
        .name("emerge-console".to_string())
        .spawn(move || {
            let mut parser = TitleParser::new();
            let mut buf = [0u8; 4096];
            loop {
                match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = on_chunk(&buf[..n], &mut parser) {
                            warn!("Failed to write console output: {}", e);
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    // Linux reports a closed pty slave as EIO
                    Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => break,
                    Err(e) => {
                        warn!("Terminal read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("Console reader finished");
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_bel_terminated_title() {
        let mut parser = TitleParser::new();
        assert_eq!(
            parser.feed(b"output\x1b]0;emerge: (1 of 3) dev-libs/foo\x07more"),
            Some("emerge: (1 of 3) dev-libs/foo".to_string())
        );
    }

    #[test]
    fn test_parse_st_terminated_title_across_chunks() {
        let mut parser = TitleParser::new();
        assert_eq!(parser.feed(b"\x1b]2;Comp"), None);
        assert_eq!(parser.feed(b"iling\x1b"), None);
        assert_eq!(parser.feed(b"\\"), Some("Compiling".to_string()));
    }

    #[test]
    fn test_ignores_other_sequences() {
        let mut parser = TitleParser::new();
        assert_eq!(parser.feed(b"\x1b[1;32m>>>\x1b[0m \x1b]7;file:///tmp\x07"), None);
        assert_eq!(parser.feed(b"\x1b]0;a\x07\x1b]0;b\x07"), Some("b".to_string()));
    }

    #[test]
    fn test_pty_console_tracks_title() {
        let buf = SharedBuf::default();
        let console = PtyConsole::with_sink(Box::new(buf.clone()));
        let (mut writer, reader) = UnixStream::pair().unwrap();

        console.attach_terminal(OwnedFd::from(reader)).unwrap();
        writer.write_all(b"hello \x1b]0;emerge: fetching\x07world").unwrap();
        drop(writer);

        let deadline = Instant::now() + Duration::from_secs(5);
        while console.window_title().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(console.window_title().as_deref(), Some("emerge: fetching"));

        while !buf.0.lock().ends_with(b"world") && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(buf.0.lock().starts_with(b"hello "));
        assert!(buf.0.lock().ends_with(b"world"));
    }
}
