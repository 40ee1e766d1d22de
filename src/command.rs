//! Command dispatch.
//!
//! Turns a decoded [`Request`] into exactly one store operation and a
//! [`Response`]. Bad commands (unknown verb, wrong arity) are answered with
//! an ERROR status; they never affect the connection.
//!
//! | Command         | Success               | Miss                 |
//! |-----------------|-----------------------|----------------------|
//! | `get <key>`     | OK, payload = value   | NOT_FOUND, empty     |
//! | `set <key> <v>` | OK, empty             |                      |
//! | `del <key>`     | OK, empty             | OK (no-op)           |

use crate::protocol::{Request, Response, Status};
use crate::storage::Store;
use bytes::Bytes;
use std::mem::take;
use thiserror::Error;
use tracing::{debug, trace};

/// A validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get { key: Bytes },
    Set { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

/// Reasons a request is not a valid command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{verb}': got {got}, expected {expected}")]
    WrongArity {
        verb: &'static str,
        got: usize,
        expected: usize,
    },
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Set,
    Del,
}

impl Verb {
    fn name(self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Set => "set",
            Verb::Del => "del",
        }
    }

    /// Argument count including the verb itself.
    fn arity(self) -> usize {
        match self {
            Verb::Get | Verb::Del => 2,
            Verb::Set => 3,
        }
    }
}

impl Command {
    /// Validate verb and arity. Verbs are matched exactly.
    pub fn parse(mut args: Vec<Bytes>) -> Result<Self, CommandError> {
        let verb = match args.first().map(|verb| &verb[..]) {
            None => return Err(CommandError::Empty),
            Some(b"get") => Verb::Get,
            Some(b"set") => Verb::Set,
            Some(b"del") => Verb::Del,
            Some(other) => {
                return Err(CommandError::UnknownCommand(
                    String::from_utf8_lossy(other).into_owned(),
                ))
            }
        };

        match (verb, args.as_mut_slice()) {
            (Verb::Get, [_, key]) => Ok(Command::Get { key: take(key) }),
            (Verb::Set, [_, key, value]) => Ok(Command::Set {
                key: take(key),
                value: take(value),
            }),
            (Verb::Del, [_, key]) => Ok(Command::Del { key: take(key) }),
            (verb, args) => Err(CommandError::WrongArity {
                verb: verb.name(),
                got: args.len(),
                expected: verb.arity(),
            }),
        }
    }

    /// Run the command against the store.
    pub fn execute(self, store: &mut Store) -> Response {
        match self {
            Command::Get { key } => match store.get(&key) {
                Some(value) => Response::ok(value.clone()),
                None => Response::empty(Status::NotFound),
            },
            Command::Set { key, value } => {
                store.set(key, value);
                Response::empty(Status::Ok)
            }
            Command::Del { key } => {
                store.delete(&key);
                Response::empty(Status::Ok)
            }
        }
    }
}

/// Dispatch a request against the store. Never fails.
pub fn dispatch(request: Request, store: &mut Store) -> Response {
    match Command::parse(request.into_args()) {
        Ok(command) => {
            trace!(?command, "Dispatching command");
            command.execute(store)
        }
        Err(e) => {
            debug!(error = %e, "Rejected command");
            Response::empty(Status::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &mut Store, args: &[&'static str]) -> Response {
        dispatch(args.iter().copied().collect(), store)
    }

    #[test]
    fn test_parse_commands() {
        let args = |a: &[&'static str]| a.iter().map(|s| Bytes::from(*s)).collect::<Vec<_>>();

        assert_eq!(
            Command::parse(args(&["get", "k"])),
            Ok(Command::Get {
                key: Bytes::from("k")
            })
        );
        assert_eq!(
            Command::parse(args(&["set", "k", "v"])),
            Ok(Command::Set {
                key: Bytes::from("k"),
                value: Bytes::from("v")
            })
        );
        assert_eq!(
            Command::parse(args(&["del", "k"])),
            Ok(Command::Del {
                key: Bytes::from("k")
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        let args = |a: &[&'static str]| a.iter().map(|s| Bytes::from(*s)).collect::<Vec<_>>();

        assert_eq!(Command::parse(vec![]), Err(CommandError::Empty));
        assert_eq!(
            Command::parse(args(&["foo", "a"])),
            Err(CommandError::UnknownCommand("foo".to_string()))
        );
        assert_eq!(
            Command::parse(args(&["GET", "a"])),
            Err(CommandError::UnknownCommand("GET".to_string()))
        );
        assert_eq!(
            Command::parse(args(&["get", "a", "b"])),
            Err(CommandError::WrongArity {
                verb: "get",
                got: 3,
                expected: 2
            })
        );
    }

    #[test]
    fn test_set_get_del_scenario() {
        let mut store = Store::new();

        assert_eq!(run(&mut store, &["set", "x", "1"]), Response::empty(Status::Ok));
        assert_eq!(
            run(&mut store, &["get", "x"]),
            Response::ok(Bytes::from("1"))
        );
        assert_eq!(run(&mut store, &["del", "x"]), Response::empty(Status::Ok));
        assert_eq!(
            run(&mut store, &["get", "x"]),
            Response::empty(Status::NotFound)
        );
    }

    #[test]
    fn test_overwrite_semantics() {
        let mut store = Store::new();

        run(&mut store, &["set", "k", "v1"]);
        run(&mut store, &["set", "k", "v2"]);
        assert_eq!(
            run(&mut store, &["get", "k"]),
            Response::ok(Bytes::from("v2"))
        );
    }

    #[test]
    fn test_idempotent_delete() {
        let mut store = Store::new();

        assert_eq!(
            run(&mut store, &["del", "missing"]),
            Response::empty(Status::Ok)
        );
        assert_eq!(
            run(&mut store, &["get", "missing"]),
            Response::empty(Status::NotFound)
        );
    }

    #[test]
    fn test_invalid_commands_do_not_mutate() {
        let mut store = Store::new();
        store.set(Bytes::from("a"), Bytes::from("orig"));

        for args in [
            &["get", "a", "b"][..],
            &["set", "a"][..],
            &["foo", "a"][..],
            &["del"][..],
            &["set", "a", "b", "c"][..],
            &[][..],
        ] {
            assert_eq!(run(&mut store, args), Response::empty(Status::Error));
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(b"a"), Some(&Bytes::from("orig")));
    }
}
