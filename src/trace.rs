//! Replaying malloc-lab allocation traces.
//!
//! A trace starts with four numbers (suggested heap size, number of block
//! ids, number of operations, weight) followed by one operation per line:
//!
//! ```text
//!   20000
//!   2
//!   5
//!   1
//!   a 0 512      allocate 512 bytes as block 0
//!   a 1 128
//!   r 0 640      reallocate block 0 to 640 bytes
//!   f 1          free block 1
//!   f 0
//! ```
//!
//! [`replay`] runs a trace against an [`Allocator`], checking every payload
//! it handed out along the way.

use std::str::FromStr;

use thiserror::Error;

use crate::{
  ALIGNMENT,
  allocator::{Allocator, HeapPtr},
  error::AllocError,
  source::HeapSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Alloc { id: usize, size: usize },
  Realloc { id: usize, size: usize },
  Free { id: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
  pub suggested_heap_size: usize,
  pub num_ids: usize,
  pub weight: usize,
  pub ops: Vec<Op>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceError {
  #[error("line {line}: {reason}")]
  Parse { line: usize, reason: String },

  #[error("op {index}: block {id} is not live")]
  NotLive { index: usize, id: usize },

  #[error("op {index}: block {id} is already live")]
  AlreadyLive { index: usize, id: usize },

  #[error("op {index}: payload of block {id} was overwritten")]
  PayloadCorrupted { index: usize, id: usize },

  #[error("op {index}: block {id} at {offset:#x} overlaps a live block")]
  Overlap { index: usize, id: usize, offset: usize },

  #[error("op {index}: block {id} is not 8-byte aligned")]
  Misaligned { index: usize, id: usize },

  #[error("op {index}: {source}")]
  Alloc {
    index: usize,
    #[source]
    source: AllocError,
  },
}

fn parse_error(
  line: usize,
  reason: impl Into<String>,
) -> TraceError {
  TraceError::Parse {
    line,
    reason: reason.into(),
  }
}

/// Pulls numbers out of whitespace-separated tokens, remembering the line
/// each one came from.
struct Tokens<'a> {
  tokens: std::iter::Peekable<Box<dyn Iterator<Item = (usize, &'a str)> + 'a>>,
  last_line: usize,
}

impl<'a> Tokens<'a> {
  fn new(input: &'a str) -> Self {
    let tokens: Box<dyn Iterator<Item = (usize, &'a str)> + 'a> = Box::new(
      input
        .lines()
        .enumerate()
        .flat_map(|(index, line)| line.split_whitespace().map(move |token| (index + 1, token))),
    );
    Self {
      tokens: tokens.peekable(),
      last_line: 0,
    }
  }

  fn next_token(
    &mut self,
    what: &str,
  ) -> Result<(usize, &'a str), TraceError> {
    match self.tokens.next() {
      Some((line, token)) => {
        self.last_line = line;
        Ok((line, token))
      }
      None => Err(parse_error(self.last_line, format!("expected {what}, found end of input"))),
    }
  }

  fn number(
    &mut self,
    what: &str,
  ) -> Result<usize, TraceError> {
    let (line, token) = self.next_token(what)?;
    token
      .parse()
      .map_err(|_| parse_error(line, format!("expected {what}, found `{token}`")))
  }

  fn is_empty(&mut self) -> bool {
    self.tokens.peek().is_none()
  }
}

impl Trace {
  pub fn parse(input: &str) -> Result<Self, TraceError> {
    let mut tokens = Tokens::new(input);
    let suggested_heap_size = tokens.number("suggested heap size")?;
    let num_ids = tokens.number("number of ids")?;
    let num_ops = tokens.number("number of operations")?;
    let weight = tokens.number("weight")?;

    let mut ops = Vec::new();
    while !tokens.is_empty() {
      let (line, kind) = tokens.next_token("operation")?;
      let id = tokens.number("block id")?;
      if id >= num_ids {
        return Err(parse_error(line, format!("block id {id} exceeds the declared {num_ids} ids")));
      }
      let op = match kind {
        "a" => Op::Alloc {
          id,
          size: tokens.number("size")?,
        },
        "r" => Op::Realloc {
          id,
          size: tokens.number("size")?,
        },
        "f" => Op::Free { id },
        other => return Err(parse_error(line, format!("unknown operation `{other}`"))),
      };
      ops.push(op);
    }

    if ops.len() != num_ops {
      return Err(parse_error(
        tokens.last_line,
        format!("declared {num_ops} operations, found {}", ops.len()),
      ));
    }

    Ok(Self {
      suggested_heap_size,
      num_ids,
      weight,
      ops,
    })
  }
}

impl FromStr for Trace {
  type Err = TraceError;

  fn from_str(input: &str) -> Result<Self, Self::Err> {
    Self::parse(input)
  }
}

/// Outcome of a successful replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayReport {
  pub ops: usize,
  /// Largest sum of live payload sizes seen at any point.
  pub peak_payload: usize,
  pub heap_size: usize,
  pub extensions: usize,
  /// `peak_payload / heap_size`.
  pub utilization: f64,
}

#[derive(Debug, Clone, Copy)]
struct Live {
  ptr: HeapPtr,
  size: usize,
}

fn fill_byte(id: usize) -> u8 {
  (id % 251) as u8 + 1
}

struct Replayer<'a, S: HeapSource> {
  allocator: &'a mut Allocator<S>,
  live: Vec<Option<Live>>,
  payload: usize,
  peak_payload: usize,
}

impl<S: HeapSource> Replayer<'_, S> {
  fn alloc_err(
    index: usize,
  ) -> impl FnOnce(AllocError) -> TraceError {
    move |source| TraceError::Alloc { index, source }
  }

  fn live(
    &self,
    index: usize,
    id: usize,
  ) -> Result<Live, TraceError> {
    self.live.get(id).copied().flatten().ok_or(TraceError::NotLive { index, id })
  }

  /// Checks that the first `len` bytes at `ptr` still hold `id`'s fill.
  fn verify(
    &self,
    index: usize,
    id: usize,
    ptr: HeapPtr,
    len: usize,
  ) -> Result<(), TraceError> {
    let payload = self.allocator.payload(ptr).map_err(Self::alloc_err(index))?;
    if payload[..len].iter().any(|&byte| byte != fill_byte(id)) {
      return Err(TraceError::PayloadCorrupted { index, id });
    }
    Ok(())
  }

  /// Checks placement of a fresh block and fills its payload.
  fn adopt(
    &mut self,
    index: usize,
    id: usize,
    ptr: HeapPtr,
    size: usize,
  ) -> Result<(), TraceError> {
    if self.allocator.address(ptr) % ALIGNMENT != 0 {
      return Err(TraceError::Misaligned { index, id });
    }
    let start = ptr.offset();
    let end = start + size;
    let overlaps = self
      .live
      .iter()
      .enumerate()
      .filter(|&(other, _)| other != id)
      .filter_map(|(_, live)| *live)
      .any(|live| start < live.ptr.offset() + live.size && live.ptr.offset() < end);
    if overlaps {
      return Err(TraceError::Overlap { index, id, offset: start });
    }

    let payload = self.allocator.payload_mut(ptr).map_err(Self::alloc_err(index))?;
    payload[..size].fill(fill_byte(id));
    self.live[id] = Some(Live { ptr, size });
    Ok(())
  }

  fn step(
    &mut self,
    index: usize,
    op: Op,
  ) -> Result<(), TraceError> {
    match op {
      Op::Alloc { id, size } => {
        match self.live.get(id) {
          None => return Err(TraceError::NotLive { index, id }),
          Some(Some(_)) => return Err(TraceError::AlreadyLive { index, id }),
          Some(None) => {}
        }
        let ptr = self.allocator.allocate(size).map_err(Self::alloc_err(index))?;
        self.adopt(index, id, ptr, size)?;
        self.payload += size;
      }
      Op::Realloc { id, size } => {
        let old = self.live(index, id)?;
        self.verify(index, id, old.ptr, old.size)?;
        let moved = self
          .allocator
          .reallocate(Some(old.ptr), size)
          .map_err(Self::alloc_err(index))?;
        self.payload -= old.size;
        self.live[id] = None;
        if let Some(ptr) = moved {
          self.verify(index, id, ptr, old.size.min(size))?;
          self.adopt(index, id, ptr, size)?;
          self.payload += size;
        }
      }
      Op::Free { id } => {
        let old = self.live(index, id)?;
        self.verify(index, id, old.ptr, old.size)?;
        self.allocator.free(old.ptr).map_err(Self::alloc_err(index))?;
        self.live[id] = None;
        self.payload -= old.size;
      }
    }
    self.peak_payload = self.peak_payload.max(self.payload);
    Ok(())
  }
}

/// Runs every operation of `trace` against `allocator`.
pub fn replay<S: HeapSource>(
  allocator: &mut Allocator<S>,
  trace: &Trace,
) -> Result<ReplayReport, TraceError> {
  let mut replayer = Replayer {
    allocator,
    live: vec![None; trace.num_ids],
    payload: 0,
    peak_payload: 0,
  };
  for (index, &op) in trace.ops.iter().enumerate() {
    replayer.step(index, op)?;
  }

  let peak_payload = replayer.peak_payload;
  let heap_size = replayer.allocator.heap_size();
  tracing::debug!(
    "replayed {} ops: peak payload {} bytes in a {} byte heap",
    trace.ops.len(),
    peak_payload,
    heap_size
  );
  Ok(ReplayReport {
    ops: trace.ops.len(),
    peak_payload,
    heap_size,
    extensions: replayer.allocator.extensions(),
    utilization: peak_payload as f64 / heap_size as f64,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memlib::MemLib;

  const SHORT: &str = "20000\n2\n5\n1\na 0 512\na 1 128\nr 0 640\nf 1\nf 0\n";

  fn allocator() -> Allocator {
    Allocator::new(MemLib::with_capacity(1 << 22).unwrap()).unwrap()
  }

  #[test]
  fn test_parse() {
    let trace: Trace = SHORT.parse().unwrap();
    assert_eq!(trace.suggested_heap_size, 20000);
    assert_eq!(trace.num_ids, 2);
    assert_eq!(trace.weight, 1);
    assert_eq!(
      trace.ops,
      vec![
        Op::Alloc { id: 0, size: 512 },
        Op::Alloc { id: 1, size: 128 },
        Op::Realloc { id: 0, size: 640 },
        Op::Free { id: 1 },
        Op::Free { id: 0 },
      ]
    );
  }

  #[test]
  fn test_parse_errors() {
    assert_eq!(
      Trace::parse("100\n1\n1\n1\nx 0 8\n"),
      Err(TraceError::Parse {
        line: 5,
        reason: "unknown operation `x`".to_owned(),
      })
    );
    assert!(matches!(
      Trace::parse("100\n1\n1\n1\na 3 8\n"),
      Err(TraceError::Parse { line: 5, .. })
    ));
    assert!(matches!(
      Trace::parse("100\n1\n2\n1\na 0 8\n"),
      Err(TraceError::Parse { .. })
    ));
    assert!(matches!(
      Trace::parse("100\n1\n1\n1\na 0\n"),
      Err(TraceError::Parse { line: 5, .. })
    ));
    assert_eq!(
      Trace::parse("100\n1\n18446744073709551615\n1\n"),
      Err(TraceError::Parse {
        line: 4,
        reason: "declared 18446744073709551615 operations, found 0".to_owned(),
      })
    );
    assert!(matches!(
      Trace::parse("100\nlots\n"),
      Err(TraceError::Parse { line: 2, .. })
    ));
  }

  #[test]
  fn test_replay_short() {
    let trace = Trace::parse(SHORT).unwrap();
    let mut allocator = allocator();
    let report = replay(&mut allocator, &trace).unwrap();

    assert_eq!(report.ops, 5);
    assert_eq!(report.peak_payload, 768);
    assert!(report.utilization > 0.0 && report.utilization <= 1.0);
    let stats = allocator.check().unwrap();
    assert_eq!(stats.allocated_blocks, 0);
  }

  #[test]
  fn test_replay_realloc_pattern() {
    // Two blocks growing in turns, the pattern the reallocation buffer is for.
    let mut text = String::from("0\n2\n202\n1\na 0 8\na 1 8\n");
    for step in 1..=100 {
      text.push_str(&format!("r 0 {}\nr 1 {}\n", 8 + step * 16, 8 + step * 16));
    }
    let trace = Trace::parse(&text).unwrap();
    let mut allocator = allocator();
    let report = replay(&mut allocator, &trace).unwrap();

    assert_eq!(report.peak_payload, 2 * (8 + 100 * 16));
    allocator.check().unwrap();
  }

  #[test]
  fn test_replay_rejects_bad_ids() {
    let trace = Trace {
      suggested_heap_size: 0,
      num_ids: 1,
      weight: 1,
      ops: vec![Op::Free { id: 0 }],
    };
    assert_eq!(
      replay(&mut allocator(), &trace),
      Err(TraceError::NotLive { index: 0, id: 0 })
    );

    let trace = Trace {
      ops: vec![Op::Alloc { id: 0, size: 8 }, Op::Alloc { id: 0, size: 8 }],
      ..trace
    };
    assert_eq!(
      replay(&mut allocator(), &trace),
      Err(TraceError::AlreadyLive { index: 1, id: 0 })
    );
  }

  #[test]
  fn test_replay_reports_out_of_memory() {
    let trace = Trace::parse("0\n1\n1\n1\na 0 100000\n").unwrap();
    let mut allocator = Allocator::new(MemLib::with_capacity(8192).unwrap()).unwrap();
    assert!(matches!(
      replay(&mut allocator, &trace),
      Err(TraceError::Alloc {
        index: 0,
        source: AllocError::OutOfMemory { .. }
      })
    ));
  }
}
