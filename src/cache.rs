//! Explicit invalidation hook. The original application signalled writes
//! through cache revalidation tags; here handlers call `invalidate(topic)` on
//! a sink the core does not own, and whatever read cache exists subscribes to
//! it. The default sink just records and logs.

pub mod topics {
    pub const YEARS: &str = "years";
    pub const SUBJECTS: &str = "subjects";
    pub const CLASSES: &str = "classes";
    pub const STUDENTS: &str = "students";
    pub const SCALE: &str = "scale";
    pub const GRADES: &str = "grades";
    pub const RESULTS: &str = "results";
}

pub trait InvalidationSink {
    fn invalidate(&mut self, topic: &str);
}

/// Default sink: remembers what was invalidated and emits a DEBUG trace.
#[derive(Debug, Default)]
pub struct RecordingSink {
    invalidated: Vec<String>,
}

impl InvalidationSink for RecordingSink {
    fn invalidate(&mut self, topic: &str) {
        tracing::debug!(topic, "cache invalidated");
        self.invalidated.push(topic.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_collects_topics_in_order() {
        let mut sink = RecordingSink::default();
        sink.invalidate(topics::RESULTS);
        sink.invalidate(topics::GRADES);
        assert_eq!(sink.invalidated, vec!["results", "grades"]);
    }
}
