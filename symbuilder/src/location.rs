//! Symbol locations and their wire format.
//!
//! The wire format accepted and produced here:
//!
//! - `NNNN` (hex) — an image virtual address,
//! - `@regname` — a register,
//! - `[@regname + NNNN]` / `[@regname - NNNN]` — register-relative memory,
//! - `[@regname + NNNN] + NNNN` — register-relative-indirect with pre- and
//!   post-offsets.
//!
//! Whitespace between tokens is tolerated on parse; emission uses the
//! canonical spacing shown above and omits zero offsets.

#[cfg(test)]
mod tests;

use crate::{Error, Result};
use symsvc::Architecture;

/// Where a symbol's storage lives.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Location {
    /// The symbol has a constant value rather than storage.
    ConstantValue,
    /// An offset from the start of the containing structure.
    StructureRelative(u64),
    /// An offset from the module's load base.
    ImageOffset(u64),
    /// An absolute virtual address.
    VirtualAddress(u64),
    /// A register.
    Register {
        /// The architecture-assigned register number.
        register: u32,
        /// The register width in bytes.
        size: u32,
    },
    /// Memory at `[register + offset]`.
    RegisterRelative {
        /// The architecture-assigned register number.
        register: u32,
        /// The register width in bytes.
        size: u32,
        /// The signed displacement applied before the dereference.
        offset: i64,
    },
    /// Memory at `[register + pre_offset] + post_offset`: the register-
    /// relative slot holds a pointer, and the value lives at an offset from
    /// where it points.
    RegisterRelativeIndirect {
        /// The architecture-assigned register number.
        register: u32,
        /// The register width in bytes.
        size: u32,
        /// The signed displacement applied before the dereference.
        pre_offset: i32,
        /// The signed displacement applied after the dereference.
        post_offset: i32,
    },
}

fn bad(desc: &str) -> Error {
    Error::InvalidArgument(format!("cannot parse location descriptor: {desc}"))
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { rest: text }
    }

    fn skip_spaces(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn peek(&self) -> Option<char> {
        self.rest.chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.rest.starts_with(c) {
            self.rest = &self.rest[c.len_utf8()..];
            true
        } else {
            false
        }
    }

    /// Parses `@regname`, resolving the name through the architecture.
    fn register(&mut self, arch: &dyn Architecture) -> Result<(u32, u32)> {
        if !self.eat('@') {
            return Err(bad("expected '@' before a register name"));
        }
        let end = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(bad("expected a register name after '@'"));
        }
        let name = &self.rest[..end];
        self.rest = &self.rest[end..];

        let reg = arch
            .register_by_name(name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown register @{name}")))?;
        Ok((reg.id, reg.size))
    }

    /// Parses a bare hex number (no `0x` prefix).
    fn hex(&mut self) -> Result<u64> {
        let end = self
            .rest
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(self.rest.len());
        if end == 0 {
            return Err(bad("expected a hex number"));
        }
        let digits = &self.rest[..end];
        self.rest = &self.rest[end..];
        u64::from_str_radix(digits, 16).map_err(|_| bad("hex number out of range"))
    }

    /// Parses `+ NNNN` / `- NNNN` if present; returns 0 when absent.
    fn signed_offset(&mut self) -> Result<Option<i64>> {
        self.skip_spaces();
        let neg = match self.peek() {
            Some('+') => false,
            Some('-') => true,
            _ => return Ok(None),
        };
        self.eat(if neg { '-' } else { '+' });
        self.skip_spaces();
        let value = self.hex()? as i64;
        Ok(Some(if neg { -value } else { value }))
    }
}

/// Parses a location descriptor, resolving register names through `arch`.
pub fn parse_location(text: &str, arch: &dyn Architecture) -> Result<Location> {
    let mut c = Cursor::new(text);
    c.skip_spaces();

    let loc = if c.eat('[') {
        c.skip_spaces();
        if c.peek() != Some('@') {
            // A memory operand must be register-based; we do not accept a
            // location stored at an absolute memory address.
            return Err(bad("a memory operand must name a register"));
        }
        let (register, size) = c.register(arch)?;
        let pre = c.signed_offset()?.unwrap_or(0);
        c.skip_spaces();
        if !c.eat(']') {
            return Err(bad("expected ']'"));
        }

        match c.signed_offset()? {
            Some(post) => Location::RegisterRelativeIndirect {
                register,
                size,
                pre_offset: pre as i32,
                post_offset: post as i32,
            },
            None => Location::RegisterRelative {
                register,
                size,
                offset: pre,
            },
        }
    } else if c.peek() == Some('@') {
        let (register, size) = c.register(arch)?;
        Location::Register { register, size }
    } else {
        Location::VirtualAddress(c.hex()?)
    };

    c.skip_spaces();
    if !c.rest.is_empty() {
        return Err(bad("trailing characters after the location"));
    }
    Ok(loc)
}

fn push_signed(out: &mut String, value: i64) {
    if value < 0 {
        out.push_str(&format!(" - {:x}", -(value as i128)));
    } else {
        out.push_str(&format!(" + {:x}", value));
    }
}

/// Formats a location in the wire format, resolving register numbers back to
/// names through `arch`. Only the four wire forms can be formatted; the
/// structure-relative, image-offset, and constant locations have no wire
/// representation.
pub fn location_to_string(location: &Location, arch: &dyn Architecture) -> Result<String> {
    let reg_name = |id: u32| -> Result<String> {
        arch.register_by_id(id)
            .map(|r| r.name)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown register number {id}")))
    };

    match *location {
        Location::VirtualAddress(address) => Ok(format!("{:x}", address)),
        Location::Register { register, .. } => Ok(format!("@{}", reg_name(register)?)),
        Location::RegisterRelative {
            register, offset, ..
        } => {
            let mut out = format!("[@{}", reg_name(register)?);
            if offset != 0 {
                push_signed(&mut out, offset);
            }
            out.push(']');
            Ok(out)
        }
        Location::RegisterRelativeIndirect {
            register,
            pre_offset,
            post_offset,
            ..
        } => {
            let mut out = format!("[@{}", reg_name(register)?);
            if pre_offset != 0 {
                push_signed(&mut out, pre_offset as i64);
            }
            out.push(']');
            if post_offset != 0 {
                push_signed(&mut out, post_offset as i64);
            }
            Ok(out)
        }
        _ => Err(Error::Unsupported(
            "this location kind has no wire representation".to_string(),
        )),
    }
}
