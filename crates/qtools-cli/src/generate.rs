//! Message record generator used by `qmessage`

use std::io::Write;
use std::time::{Duration, Instant};

use qtools_types::{unique_id, Message, MessageId, Result};
use serde_json::Value;

use crate::args::MessageArgs;

/// Produces records from a template, numbering the ids and bodies the
/// template leaves unset
#[derive(Debug, Clone)]
pub struct Generator {
    template: Message,
    id_prefix: Option<String>,
    generate_body: bool,
    count: u64,
}

impl Generator {
    pub fn new(template: Message) -> Self {
        let id_prefix = template.id.is_none().then(|| unique_id(2));
        let generate_body = template.body.is_none();

        Self {
            template,
            id_prefix,
            generate_body,
            count: 0,
        }
    }

    /// Build the template from `qmessage` field options
    pub fn from_args(args: &MessageArgs) -> Self {
        let mut template = Message {
            id: args.id.clone().map(MessageId::from),
            correlation_id: args.correlation_id.clone().map(MessageId::from),
            user_id: args.user.clone(),
            address: args.to.clone(),
            reply_to: args.reply_to.clone(),
            durable: args.durable,
            subject: args.subject.clone(),
            body: args.body.clone(),
            ..Default::default()
        };

        if let Some(priority) = args.priority {
            template.priority = priority;
        }

        if let Some(ttl) = args.ttl {
            template.ttl = ttl;
        }

        for (name, value) in args.properties() {
            template.properties.insert(name, Value::String(value));
        }

        Self::new(template)
    }

    /// The next message in the sequence
    pub fn next_message(&mut self) -> Message {
        self.count += 1;

        let mut message = self.template.clone();

        if let Some(prefix) = &self.id_prefix {
            message.id = Some(MessageId::Str(format!("{}-{:04}", prefix, self.count)));
        }

        if self.generate_body {
            message.body = Some(format!("message-{:04}", self.count));
        }

        message
    }
}

/// How many records to write and how fast
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    /// `None` runs until the output fails
    pub count: Option<u64>,
    pub interval: Option<Duration>,
}

impl Schedule {
    /// One message by default; a rate with no count is unlimited
    pub fn new(count: Option<u64>, rate: Option<u32>) -> Self {
        let interval = rate
            .filter(|rate| *rate > 0)
            .map(|rate| Duration::from_secs_f64(1.0 / f64::from(rate)));

        let count = match (count, interval) {
            (Some(count), _) => Some(count),
            (None, None) => Some(1),
            (None, Some(_)) => None,
        };

        Self { count, interval }
    }
}

/// Write records to `out` one per line, flushing after each. Returns the
/// number written.
pub fn write_records(
    generator: &mut Generator,
    schedule: Schedule,
    out: &mut dyn Write,
) -> Result<u64> {
    let mut written = 0;

    while schedule.count.map_or(true, |count| written < count) {
        let start = Instant::now();

        let record = generator.next_message().to_record()?;
        writeln!(out, "{}", record)?;
        out.flush()?;
        written += 1;

        if let Some(interval) = schedule.interval {
            std::thread::sleep(interval.saturating_sub(start.elapsed()));
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_generated_ids_and_bodies() {
        let mut generator = Generator::new(Message::default());

        let first = generator.next_message();
        let second = generator.next_message();

        let first_id = first.id.unwrap().to_string();
        let second_id = second.id.unwrap().to_string();

        assert!(first_id.ends_with("-0001"));
        assert!(second_id.ends_with("-0002"));
        assert_eq!(first_id[..4], second_id[..4]);
        assert_eq!(first.body.as_deref(), Some("message-0001"));
        assert_eq!(second.body.as_deref(), Some("message-0002"));
    }

    #[test]
    fn test_fixed_fields_are_kept() {
        let args = MessageArgs::parse_from([
            "qmessage",
            "--id",
            "m1",
            "--body",
            "abc",
            "--to",
            "q1",
            "--property",
            "color",
            "red",
        ]);

        let mut generator = Generator::from_args(&args);
        let record = generator.next_message().to_record().unwrap();

        assert_eq!(
            record,
            r#"{"id":"m1","to":"q1","properties":{"color":"red"},"body":"abc"}"#
        );
    }

    #[test]
    fn test_schedule_defaults() {
        assert_eq!(Schedule::new(None, None).count, Some(1));
        assert_eq!(Schedule::new(None, Some(10)).count, None);
        assert_eq!(Schedule::new(Some(3), Some(10)).count, Some(3));
        assert_eq!(
            Schedule::new(None, Some(4)).interval,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_write_records() {
        let mut generator = Generator::new(Message::new("x"));
        let mut out = Vec::new();

        let written = write_records(&mut generator, Schedule::new(Some(3), None), &mut out).unwrap();

        assert_eq!(written, 3);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|line| line.contains(r#""body":"x""#)));
    }
}
