//! Protocol command framing.
//!
//! A command is a verb (unsigned integer) followed by an array of arguments.
//! When a command has arguments, it is terminated by a zero-length array;
//! anything between the argument array and the terminator (such as the rows
//! of a ROWS reply) is part of the command. A command without arguments
//! sends an empty argument array, which doubles as the terminator.
//!
//! This module also carries the HASH and ROWS exchanges, the two messages
//! the hashing core exists to serve, and the HASH_ALGORITHM negotiation
//! that picks the digest both ends use.

use std::fmt;

use bytes::Bytes;

use crate::digest::{DigestAlgorithm, DigestRegistry};
use crate::error::{Result, SyncError};
use crate::hasher::{HashResult, RemoteHash};
use crate::row::ColumnValues;
use crate::wire::{ByteSink, Packer, Unpacker};

/// Protocol verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Quit,
    Rows,
    Hash,
    Range,
    Protocol,
    ExportSnapshot,
    ImportSnapshot,
    UnholdSnapshot,
    WithoutSnapshot,
    Schema,
    TargetBlockSize,
    HashAlgorithm,
}

impl Verb {
    /// Wire code.
    pub fn code(self) -> u64 {
        match self {
            Verb::Quit => 0,
            Verb::Rows => 2,
            Verb::Hash => 7,
            Verb::Range => 8,
            Verb::Protocol => 32,
            Verb::ExportSnapshot => 33,
            Verb::ImportSnapshot => 34,
            Verb::UnholdSnapshot => 35,
            Verb::WithoutSnapshot => 36,
            Verb::Schema => 37,
            Verb::TargetBlockSize => 38,
            Verb::HashAlgorithm => 39,
        }
    }

    /// Look up a wire code.
    pub fn from_code(code: u64) -> Result<Self> {
        let verb = match code {
            0 => Verb::Quit,
            2 => Verb::Rows,
            7 => Verb::Hash,
            8 => Verb::Range,
            32 => Verb::Protocol,
            33 => Verb::ExportSnapshot,
            34 => Verb::ImportSnapshot,
            35 => Verb::UnholdSnapshot,
            36 => Verb::WithoutSnapshot,
            37 => Verb::Schema,
            38 => Verb::TargetBlockSize,
            39 => Verb::HashAlgorithm,
            other => return Err(SyncError::command(format!("Unknown command {}", other))),
        };
        Ok(verb)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Verb::Quit => "quit",
            Verb::Rows => "rows",
            Verb::Hash => "hash",
            Verb::Range => "range",
            Verb::Protocol => "protocol",
            Verb::ExportSnapshot => "export_snapshot",
            Verb::ImportSnapshot => "import_snapshot",
            Verb::UnholdSnapshot => "unhold_snapshot",
            Verb::WithoutSnapshot => "without_snapshot",
            Verb::Schema => "schema",
            Verb::TargetBlockSize => "target_block_size",
            Verb::HashAlgorithm => "hash_algorithm",
        };
        f.write_str(name)
    }
}

/// A single command argument.
#[derive(Debug, Clone, Copy)]
pub enum Argument<'a> {
    Uint(u64),
    Str(&'a [u8]),
    Key(&'a [Vec<u8>]),
}

impl Argument<'_> {
    fn encode<S: ByteSink>(&self, packer: &mut Packer<S>) {
        match *self {
            Argument::Uint(value) => packer.encode_uint(value),
            Argument::Str(bytes) => packer.encode_string(bytes),
            Argument::Key(values) => packer.encode_column_values(values),
        }
    }
}

/// Write the verb and argument array, leaving the command open.
pub fn send_command_begin<S: ByteSink>(packer: &mut Packer<S>, verb: Verb, args: &[Argument<'_>]) {
    packer.encode_uint(verb.code());
    packer.encode_array_length(args.len());
    for arg in args {
        arg.encode(packer);
    }
}

/// Terminate a command that had arguments.
pub fn send_command_end<S: ByteSink>(packer: &mut Packer<S>) {
    packer.encode_array_length(0);
}

/// Write a complete command.
pub fn send_command<S: ByteSink>(packer: &mut Packer<S>, verb: Verb, args: &[Argument<'_>]) {
    send_command_begin(packer, verb, args);
    if !args.is_empty() {
        send_command_end(packer);
    }
}

/// Read the next verb.
pub fn read_verb(input: &mut Unpacker) -> Result<Verb> {
    Verb::from_code(input.next_uint()?)
}

/// Read a verb and fail unless it is `expected`.
pub fn expect_verb(input: &mut Unpacker, expected: Verb) -> Result<()> {
    let verb = read_verb(input)?;
    if verb != expected {
        return Err(SyncError::command(format!(
            "Expected command {} but received {}",
            expected, verb
        )));
    }
    Ok(())
}

/// Read the argument array header and check its length.
pub fn read_argument_header(input: &mut Unpacker, expected: usize) -> Result<()> {
    let len = input.next_array_length()?;
    if len != expected {
        return Err(SyncError::command(format!(
            "Expected {} arguments, got {}",
            expected, len
        )));
    }
    Ok(())
}

/// Read the terminator of a command that had arguments.
pub fn read_command_end(input: &mut Unpacker) -> Result<()> {
    let len = input.next_array_length()?;
    if len != 0 {
        return Err(SyncError::command("Expected only one set of arguments"));
    }
    Ok(())
}

/// A HASH request: hash up to `rows_to_hash` rows with keys in
/// `(prev_key, last_key]`. Empty keys mean "from the start" / "to the end".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRequest {
    pub table: String,
    pub prev_key: ColumnValues,
    pub last_key: ColumnValues,
    pub rows_to_hash: u64,
}

impl HashRequest {
    /// Send this request.
    pub fn send<S: ByteSink>(&self, packer: &mut Packer<S>) {
        send_command(
            packer,
            Verb::Hash,
            &[
                Argument::Str(self.table.as_bytes()),
                Argument::Key(&self.prev_key),
                Argument::Key(&self.last_key),
                Argument::Uint(self.rows_to_hash),
            ],
        );
    }

    /// Read the arguments of a HASH request whose verb was already consumed.
    pub fn read_arguments(input: &mut Unpacker) -> Result<Self> {
        read_argument_header(input, 4)?;
        let table = read_text(input, "table name")?;
        let prev_key = input.next_column_values()?;
        let last_key = input.next_column_values()?;
        let rows_to_hash = input.next_uint()?;
        read_command_end(input)?;
        Ok(Self {
            table,
            prev_key,
            last_key,
            rows_to_hash,
        })
    }

    /// Reply with the locally computed result: the request arguments echoed
    /// back, then the row count and the digest.
    pub fn send_reply<S: ByteSink>(&self, packer: &mut Packer<S>, result: &HashResult) {
        send_command(
            packer,
            Verb::Hash,
            &[
                Argument::Str(self.table.as_bytes()),
                Argument::Key(&self.prev_key),
                Argument::Key(&self.last_key),
                Argument::Uint(self.rows_to_hash),
                Argument::Uint(result.row_count),
                Argument::Str(result.digest.as_bytes()),
            ],
        );
    }

    /// Read a HASH reply (verb included) and check it answers this request.
    pub fn read_reply(&self, input: &mut Unpacker) -> Result<RemoteHash> {
        expect_verb(input, Verb::Hash)?;
        read_argument_header(input, 6)?;
        let table = read_text(input, "table name")?;
        let prev_key = input.next_column_values()?;
        let last_key = input.next_column_values()?;
        let rows_to_hash = input.next_uint()?;
        let row_count = input.next_uint()?;
        let digest: Bytes = input.next_string()?;
        read_command_end(input)?;

        if table != self.table
            || prev_key != self.prev_key
            || last_key != self.last_key
            || rows_to_hash != self.rows_to_hash
        {
            return Err(SyncError::command(format!(
                "Expected arguments {}, {:?}, {:?}, {} but received {}, {:?}, {:?}, {}",
                self.table,
                self.prev_key,
                self.last_key,
                self.rows_to_hash,
                table,
                prev_key,
                last_key,
                rows_to_hash
            )));
        }
        Ok(RemoteHash { digest, row_count })
    }
}

/// A ROWS request: send every row with keys in `(prev_key, last_key]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowsRequest {
    pub table: String,
    pub prev_key: ColumnValues,
    pub last_key: ColumnValues,
}

impl RowsRequest {
    fn arguments(&self) -> [Argument<'_>; 3] {
        [
            Argument::Str(self.table.as_bytes()),
            Argument::Key(&self.prev_key),
            Argument::Key(&self.last_key),
        ]
    }

    /// Send this request.
    pub fn send<S: ByteSink>(&self, packer: &mut Packer<S>) {
        send_command(packer, Verb::Rows, &self.arguments());
    }

    /// Read the arguments of a ROWS request whose verb was already consumed.
    pub fn read_arguments(input: &mut Unpacker) -> Result<Self> {
        read_argument_header(input, 3)?;
        let table = read_text(input, "table name")?;
        let prev_key = input.next_column_values()?;
        let last_key = input.next_column_values()?;
        read_command_end(input)?;
        Ok(Self {
            table,
            prev_key,
            last_key,
        })
    }

    /// Open the ROWS reply. The caller then streams rows through a
    /// [`RowPacker`](crate::packer::RowPacker), whose end-of-rowset marker
    /// also terminates the command.
    pub fn begin_reply<S: ByteSink>(&self, packer: &mut Packer<S>) {
        send_command_begin(packer, Verb::Rows, &self.arguments());
    }

    /// Read the ROWS reply header (verb and echoed arguments). The rows
    /// follow and are read with [`RowStream`](crate::packer::RowStream).
    pub fn read_reply_header(&self, input: &mut Unpacker) -> Result<()> {
        expect_verb(input, Verb::Rows)?;
        read_argument_header(input, 3)?;
        let table = read_text(input, "table name")?;
        let prev_key = input.next_column_values()?;
        let last_key = input.next_column_values()?;
        if table != self.table || prev_key != self.prev_key || last_key != self.last_key {
            return Err(SyncError::command(format!(
                "ROWS reply for {} does not match request for {}",
                table, self.table
            )));
        }
        Ok(())
    }
}

/// A HASH_ALGORITHM request: choose the digest for all later HASH exchanges.
///
/// The answering side resolves the name and echoes it back; both ends then
/// hash with the same algorithm. An unknown name is refused with an error
/// instead of an echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashAlgorithmRequest {
    pub algorithm: String,
}

impl HashAlgorithmRequest {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
        }
    }

    fn send_named<S: ByteSink>(packer: &mut Packer<S>, name: &str) {
        send_command(packer, Verb::HashAlgorithm, &[Argument::Str(name.as_bytes())]);
    }

    /// Send this request.
    pub fn send<S: ByteSink>(&self, packer: &mut Packer<S>) {
        Self::send_named(packer, &self.algorithm);
    }

    /// Read the arguments of a HASH_ALGORITHM request whose verb was already
    /// consumed.
    pub fn read_arguments(input: &mut Unpacker) -> Result<Self> {
        read_argument_header(input, 1)?;
        let algorithm = read_text(input, "algorithm name")?;
        read_command_end(input)?;
        Ok(Self { algorithm })
    }

    /// Resolve the requested algorithm and echo its name.
    ///
    /// Nothing is written when the name is unknown.
    pub fn accept<S: ByteSink>(
        &self,
        registry: &DigestRegistry,
        packer: &mut Packer<S>,
    ) -> Result<DigestAlgorithm> {
        let algorithm = registry.lookup(&self.algorithm)?;
        Self::send_named(packer, &self.algorithm);
        Ok(algorithm)
    }

    /// Read the echo (verb included) and resolve the agreed algorithm.
    pub fn read_reply(
        &self,
        registry: &DigestRegistry,
        input: &mut Unpacker,
    ) -> Result<DigestAlgorithm> {
        expect_verb(input, Verb::HashAlgorithm)?;
        let echoed = Self::read_arguments(input)?;
        if !echoed.algorithm.eq_ignore_ascii_case(&self.algorithm) {
            return Err(SyncError::command(format!(
                "Requested hash algorithm {} but peer answered {}",
                self.algorithm, echoed.algorithm
            )));
        }
        registry.lookup(&echoed.algorithm)
    }
}

fn read_text(input: &mut Unpacker, what: &str) -> Result<String> {
    let offset = input.position();
    let raw = input.next_string()?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| SyncError::decode(offset, format!("{} is not valid UTF-8", what)))
}
