//! Catalog sinks receiving finalized objects.

use crate::error::Result;
use crate::object::FinalizedObject;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Receives emitted objects in non-decreasing `bbox.max_row` order.
pub trait ObjectSink {
    fn emit(&mut self, object: FinalizedObject) -> Result<()>;

    /// Called once after the last object.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl ObjectSink for Vec<FinalizedObject> {
    fn emit(&mut self, object: FinalizedObject) -> Result<()> {
        self.push(object);
        Ok(())
    }
}

/// Writes one JSON record per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ObjectSink for JsonLinesSink<W> {
    fn emit(&mut self, object: FinalizedObject) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &object)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::tests::object_at;
    use serde_json::Value;

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<FinalizedObject> = Vec::new();
        sink.emit(object_at(1.0, 2.0, 3.0)).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_json_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let mut a = object_at(4.0, 5.0, 10.0);
        a.id = 1;
        let mut b = object_at(8.0, 9.0, 20.0);
        b.id = 2;
        sink.emit(a).unwrap();
        sink.emit(b).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.written(), 2);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["id"], 2);
        assert_eq!(lines[0]["flux"], 10.0);
        assert_eq!(lines[0]["bbox"]["min_row"], 4);
        assert_eq!(lines[0]["flags"], 0);
    }
}
