//! Traces items and errors as they pass.

use futures::StreamExt;
use tracing::{debug, error, info, trace, warn, Level};

use crate::cabinet::{BuildContext, StageJar};
use crate::definition::JarSpec;
use crate::error::FlowError;
use crate::flow::Flow;
use crate::item::Item;

/// Logs every item at `level` (default `info`) with an optional `message`.
///
/// Errors are logged at `error` and forwarded unchanged.
pub struct LogStageJar;

impl StageJar for LogStageJar {
    fn new_stage(
        &self,
        spec: &JarSpec,
        build: &BuildContext<'_>,
        input: Flow,
    ) -> Result<Flow, FlowError> {
        let level = match spec.str_option("level")? {
            Some(level) => parse_level(level)?,
            None => Level::INFO,
        };
        let message = spec.str_option("message")?.unwrap_or("Item").to_string();
        let stage = format!(
            "{}.{}",
            build.pipeline().unwrap_or("unnamed"),
            spec.display_name()
        );

        Ok(input.transform(move |items, _| {
            let message = message.clone();
            let stage = stage.clone();
            items
                .inspect(move |result| match result {
                    Ok(item) => log_item(level, &stage, &message, item),
                    Err(e) => error!(stage = %stage, error = %e, "Stream failed"),
                })
                .boxed()
        }))
    }
}

fn parse_level(level: &str) -> Result<Level, FlowError> {
    level
        .parse()
        .map_err(|_| FlowError::invalid("level", format!("unknown level '{}'", level)))
}

fn log_item(level: Level, stage: &str, message: &str, item: &Item) {
    let position = item.metadata.stream_position();
    let data = &item.data;
    match level {
        Level::TRACE => trace!(stage, position, %data, "{}", message),
        Level::DEBUG => debug!(stage, position, %data, "{}", message),
        Level::INFO => info!(stage, position, %data, "{}", message),
        Level::WARN => warn!(stage, position, %data, "{}", message),
        _ => error!(stage, position, %data, "{}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(matches!(
            parse_level("loud"),
            Err(FlowError::InvalidOption { option, .. }) if option == "level"
        ));
    }
}
