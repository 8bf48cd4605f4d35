use std::io::Write;
use std::sync::mpsc::SyncSender;

use serde::Serialize;

use super::{Cycle, StreamError};

/// Downstream end of the detection loop.
///
/// `emit` blocks until the record is accepted. A sink reports a gone peer as
/// `StreamError::ChannelClosed`; that is the loop's only cancellation signal
/// from downstream.
pub trait RecordSink {
    fn emit(&mut self, cycle: Cycle) -> Result<(), StreamError>;
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn emit(&mut self, cycle: Cycle) -> Result<(), StreamError> {
        (**self).emit(cycle)
    }
}

/// Bounded hand-off to a transport thread. A full channel blocks the
/// producer; a dropped receiver closes the stream.
impl RecordSink for SyncSender<super::OccupancyRecord> {
    fn emit(&mut self, cycle: Cycle) -> Result<(), StreamError> {
        self.send(cycle.record)
            .map_err(|_| StreamError::ChannelClosed)
    }
}

/// One JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
    per_space: bool,
}

#[derive(Serialize)]
struct DetailedRecord<'a> {
    #[serde(flatten)]
    record: &'a super::OccupancyRecord,
    spaces: &'a [crate::detect::SpaceStatus],
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            per_space: false,
        }
    }

    /// Append a `spaces` array with each space's foreground count.
    pub fn with_per_space(mut self, per_space: bool) -> Self {
        self.per_space = per_space;
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, cycle: &Cycle) -> std::io::Result<()> {
        if self.per_space {
            let detailed = DetailedRecord {
                record: &cycle.record,
                spaces: &cycle.summary.spaces,
            };
            serde_json::to_writer(&mut self.out, &detailed)?;
        } else {
            serde_json::to_writer(&mut self.out, &cycle.record)?;
        }
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, cycle: Cycle) -> Result<(), StreamError> {
        self.write_line(&cycle).map_err(|e| {
            log::debug!("record writer closed: {}", e);
            StreamError::ChannelClosed
        })
    }
}
