//! Incremental decoder for the qubesd event stream.
//!
//! After the `0\0` connection acknowledgement, events arrive as frames of
//! NUL-separated fields terminated by a double NUL:
//! `1\0SUBJECT\0EVENT\0(KEY\0VALUE\0)*\0`. The subject is the literal
//! string `None` for application-level events.

use crate::AdminError;

/// One decoded admin event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// The domain this event concerns; `None` for application-level events.
    pub subject: Option<String>,
    pub name: String,
    pub args: Vec<(String, String)>,
}

impl Event {
    pub fn new(subject: Option<&str>, name: &str) -> Self {
        Self {
            subject: subject.map(str::to_owned),
            name: name.to_owned(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, key: &str, value: &str) -> Self {
        self.args.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Look up an argument by key.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Synthetic event surfaced when the stream acknowledgement arrives.
    pub fn connection_established() -> Self {
        Event::new(None, "connection-established")
    }
}

/// Events the services drop before dispatch: core-internal chatter with no
/// bearing on the published state.
pub fn is_garbage(name: &str) -> bool {
    name == "domain-load"
        || name == "domain-is-fully-usable"
        || name.starts_with("property-pre-set")
}

/// Incremental frame decoder. Feed raw bytes as they arrive; partial
/// frames are retained until completed by later reads.
#[derive(Debug, Default)]
pub struct EventReader {
    buf: Vec<u8>,
    acked: bool,
}

impl EventReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete event, or `Ok(None)` if more bytes are
    /// needed. The first completed read yields the synthetic
    /// `connection-established` event.
    pub fn next_event(&mut self) -> Result<Option<Event>, AdminError> {
        if !self.acked {
            if self.buf.len() < 2 {
                return Ok(None);
            }
            if self.buf[0] == b'2' {
                // The connection itself was refused; the remainder is a
                // serialized exception.
                return match crate::proto::parse_response(&self.buf) {
                    Err(e) => Err(e),
                    Ok(_) => Err(AdminError::Malformed(
                        "bad stream acknowledgement".to_owned(),
                    )),
                };
            }
            if &self.buf[..2] != b"0\0" {
                return Err(AdminError::Malformed(format!(
                    "bad stream acknowledgement: {:?}",
                    &self.buf[..2]
                )));
            }
            self.buf.drain(..2);
            self.acked = true;
            return Ok(Some(Event::connection_established()));
        }

        let Some(end) = find_frame_end(&self.buf) else {
            return Ok(None);
        };
        let frame: Vec<u8> = self.buf.drain(..end + 2).collect();
        let frame = &frame[..frame.len() - 2];

        let fields: Vec<&[u8]> = frame.split(|b| *b == 0).collect();
        if fields.len() < 3 || fields[0] != b"1" {
            return Err(AdminError::Malformed(format!(
                "bad event frame: {frame:?}"
            )));
        }

        let subject = String::from_utf8_lossy(fields[1]).into_owned();
        let subject = match subject.as_str() {
            "" | "None" => None,
            _ => Some(subject),
        };
        let name = String::from_utf8_lossy(fields[2]).into_owned();

        let mut args = Vec::new();
        let mut pairs = fields[3..].chunks_exact(2);
        for pair in &mut pairs {
            args.push((
                String::from_utf8_lossy(pair[0]).into_owned(),
                String::from_utf8_lossy(pair[1]).into_owned(),
            ));
        }

        Ok(Some(Event {
            subject,
            name,
            args,
        }))
    }
}

fn find_frame_end(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\0\0")
}
