//! Minimal class-file probing.
//!
//! Only enough of the format is read to validate a member and recover its
//! internal name: magic, version, the constant pool and `this_class`.

use std::collections::HashMap;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;
use thiserror::Error;

pub const CLASS_MAGIC: u32 = 0xCAFE_BABE;
pub const DEX_MAGIC: &[u8; 4] = b"dex\n";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassFileError {
    #[error("missing 0xCAFEBABE magic")]
    BadMagic,
    #[error("class file is truncated")]
    Truncated,
    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },
    #[error("constant pool index {0} does not name a class")]
    BadClassIndex(u16),
}

/// What a successful probe learns about a class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub major_version: u16,
    pub minor_version: u16,
    /// Internal (slash separated) name, e.g. `com/example/Foo`.
    pub internal_name: String,
}

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class(u16),
    Other,
}

/// Returns true when `bytes` start with the class-file magic.
pub fn has_class_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == CLASS_MAGIC
}

/// Returns true when `bytes` start with the dex magic.
pub fn is_dex(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && &bytes[..4] == DEX_MAGIC
}

/// Probe a class file and resolve its internal name.
pub fn probe(bytes: &[u8]) -> Result<ClassInfo, ClassFileError> {
    if !has_class_magic(bytes) {
        return Err(ClassFileError::BadMagic);
    }
    let (rest, (minor_version, major_version)) = header(bytes).map_err(truncated)?;
    let (rest, pool) = constant_pool(rest)?;
    let (_, this_class) = after_pool(rest).map_err(truncated)?;

    let name_index = match pool.get(&this_class) {
        Some(Constant::Class(idx)) => *idx,
        _ => return Err(ClassFileError::BadClassIndex(this_class)),
    };
    let internal_name = match pool.get(&name_index) {
        Some(Constant::Utf8(name)) => name.clone(),
        _ => return Err(ClassFileError::BadClassIndex(this_class)),
    };

    Ok(ClassInfo { major_version, minor_version, internal_name })
}

fn header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, _magic) = be_u32(input)?;
    let (input, minor) = be_u16(input)?;
    let (input, major) = be_u16(input)?;
    Ok((input, (minor, major)))
}

fn after_pool(input: &[u8]) -> IResult<&[u8], u16> {
    let (input, _access_flags) = be_u16(input)?;
    be_u16(input)
}

fn constant_pool(input: &[u8]) -> Result<(&[u8], HashMap<u16, Constant>), ClassFileError> {
    let (mut input, count) = be_u16::<_, NomError<'_>>(input).map_err(truncated)?;
    let mut pool = HashMap::new();
    let mut index: u16 = 1;
    while index < count {
        let (rest, tag) = be_u8::<_, NomError<'_>>(input).map_err(truncated)?;
        let (rest, constant, slots) = constant(rest, tag, index)?;
        pool.insert(index, constant);
        input = rest;
        index = index.saturating_add(slots);
    }
    Ok((input, pool))
}

type NomError<'a> = nom::error::Error<&'a [u8]>;

fn truncated<E>(_: E) -> ClassFileError {
    ClassFileError::Truncated
}

fn skip(input: &[u8], n: usize) -> Result<&[u8], ClassFileError> {
    let (rest, _) = take::<_, _, NomError<'_>>(n)(input).map_err(truncated)?;
    Ok(rest)
}

/// Parse one constant body; returns the number of pool slots it occupies.
fn constant(input: &[u8], tag: u8, index: u16) -> Result<(&[u8], Constant, u16), ClassFileError> {
    match tag {
        1 => {
            let (rest, len) = be_u16::<_, NomError<'_>>(input).map_err(truncated)?;
            let (rest, raw) = take::<_, _, NomError<'_>>(len as usize)(rest).map_err(truncated)?;
            Ok((rest, Constant::Utf8(String::from_utf8_lossy(raw).into_owned()), 1))
        }
        7 => {
            let (rest, name) = be_u16::<_, NomError<'_>>(input).map_err(truncated)?;
            Ok((rest, Constant::Class(name), 1))
        }
        8 | 16 | 19 | 20 => Ok((skip(input, 2)?, Constant::Other, 1)),
        15 => Ok((skip(input, 3)?, Constant::Other, 1)),
        3 | 4 | 9 | 10 | 11 | 12 | 17 | 18 => Ok((skip(input, 4)?, Constant::Other, 1)),
        5 | 6 => Ok((skip(input, 8)?, Constant::Other, 2)),
        other => Err(ClassFileError::UnknownTag { tag: other, index }),
    }
}
