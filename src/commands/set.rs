use bytes::Bytes;
use std::str::{self, FromStr};
use strum_macros::EnumString;
use tokio::time::Duration;

use crate::commands::executable::Executable;
use crate::commands::{CommandParser, CommandParserError};
use crate::frame::Frame;
use crate::store::Store;
use crate::Error;

/// Set `key` to hold the string `value`. If key already holds a value, it is overwritten, and any
/// previous time to live associated with the key is discarded.
///
/// Arguments after the value are read as flag/value pairs. `PX <milliseconds>` sets the time to
/// live, anything else is skipped.
///
/// Ref: <https://redis.io/docs/latest/commands/set/>
#[derive(Debug, PartialEq)]
pub struct Set {
    pub key: Bytes,
    pub value: Bytes,
    pub ttl: Option<Duration>,
}

#[derive(Debug, PartialEq, EnumString)]
#[strum(ascii_case_insensitive)]
enum SetOption {
    #[strum(serialize = "px")]
    Px,
}

impl Executable for Set {
    fn exec(self, store: Store) -> Result<Frame, Error> {
        store.lock().set(self.key, self.value, self.ttl);

        Ok(Frame::Simple("OK".to_string()))
    }
}

impl TryFrom<&mut CommandParser> for Set {
    type Error = CommandParserError;

    fn try_from(parser: &mut CommandParser) -> Result<Self, Self::Error> {
        let key = parser.next_bytes()?;
        let value = parser.next_bytes()?;

        let mut ttl = None;

        loop {
            let option = match parser.next_bytes() {
                Ok(option) => Some(option),
                Err(CommandParserError::EndOfStream) => break,
                // Not a flag name, skip it along with its value.
                Err(_) => None,
            };
            let option = option.and_then(|name| {
                str::from_utf8(&name)
                    .ok()
                    .and_then(|name| SetOption::from_str(name).ok())
            });

            let argument = match option {
                Some(SetOption::Px) => parser.next_integer(),
                None => parser.next_bytes().map(|_| 0),
            };

            ttl = match (option, argument) {
                (_, Err(CommandParserError::EndOfStream)) => break,
                // A malformed or non-positive PX means the key does not expire.
                (Some(SetOption::Px), Ok(millis)) if millis > 0 => {
                    Some(Duration::from_millis(millis as u64))
                }
                (Some(SetOption::Px), _) => None,
                (None, _) => ttl,
            };
        }

        Ok(Self { key, value, ttl })
    }
}
