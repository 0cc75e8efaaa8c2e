//! The textual `insert`/`find`/`delete` command driver (§6). Deliberately
//! thin: no SQL, no catalog, just the three verbs the core tree exposes.
use std::io::{self, BufRead, Write};

use tracing::{debug, warn};

use crate::btree::BPlusTree;
use crate::errors::Error;
use crate::storage::codec::FixedString;

/// Key width used by the CLI's key/value vocabulary: short alphanumeric
/// identifiers, matching the `"k01"`/`"a20"`-style keys exercised by the
/// core's own test scenarios.
pub const KEY_WIDTH: usize = 16;
pub const INTERNAL_FANOUT: usize = 400;
pub const LEAF_FANOUT: usize = 10;

pub type Key = FixedString<KEY_WIDTH>;
pub type Value = i64;
pub type Tree = BPlusTree<Key, Value, INTERNAL_FANOUT, LEAF_FANOUT>;

enum Command {
    Insert(Key, Value),
    Find(Key),
    Delete(Key),
}

fn parse_line(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    match parts.next()? {
        "insert" => {
            let key = parts.next()?;
            let value: i64 = parts.next()?.parse().ok()?;
            Some(Command::Insert(Key::new(key), value))
        }
        "find" => {
            let key = parts.next()?;
            Some(Command::Find(Key::new(key)))
        }
        "delete" => {
            let key = parts.next()?;
            // The value token is part of the command's textual shape but
            // carries no meaning for removal; a unique key is sufficient.
            let _ = parts.next();
            Some(Command::Delete(Key::new(key)))
        }
        _ => None,
    }
}

fn run_command(tree: &mut Tree, cmd: Command, out: &mut impl Write) -> Result<(), Error> {
    match cmd {
        Command::Insert(k, v) => {
            debug!(key = %k, value = v, "insert");
            match tree.insert(k, v) {
                Ok(()) | Err(Error::DuplicateKey) => Ok(()),
                Err(e) => Err(e),
            }
        }
        Command::Find(k) => {
            debug!(key = %k, "find");
            let values = tree.range(&k, &k)?;
            if values.is_empty() {
                writeln!(out, "null").ok();
            } else {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                writeln!(out, "{}", rendered.join(" ")).ok();
            }
            Ok(())
        }
        Command::Delete(k) => {
            debug!(key = %k, "delete");
            match tree.remove(&k) {
                Ok(()) | Err(Error::NotFound) => Ok(()),
                Err(e) => Err(e),
            }
        }
    }
}

/// Reads a leading count `N` and then `N` commands from `input` (§6 batch
/// form).
pub fn run_batch(tree: &mut Tree, input: impl BufRead, mut out: impl Write) -> Result<(), Error> {
    let mut lines = input.lines();
    let count_line = match lines.next() {
        Some(l) => l?,
        None => return Ok(()),
    };
    let count: usize = match count_line.trim().parse() {
        Ok(n) => n,
        Err(_) => {
            warn!(line = %count_line, "malformed command count, aborting batch");
            return Ok(());
        }
    };
    for _ in 0..count {
        let line = match lines.next() {
            Some(l) => l?,
            None => break,
        };
        match parse_line(&line) {
            Some(cmd) => run_command(tree, cmd, &mut out)?,
            None => warn!(line = %line, "malformed command, skipping"),
        }
    }
    Ok(())
}

/// Reads commands from `input` until EOF (§6 interactive form).
pub fn run_interactive(
    tree: &mut Tree,
    input: impl BufRead,
    mut out: impl Write,
) -> Result<(), Error> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(&line) {
            Some(cmd) => run_command(tree, cmd, &mut out)?,
            None => warn!(line = %line, "malformed command, skipping"),
        }
    }
    Ok(())
}
