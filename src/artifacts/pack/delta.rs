//! Copy/insert delta encoding
//!
//! A delta rebuilds a target buffer from a base buffer:
//!
//! ```text
//! varint(base size) varint(target size) instruction*
//! copy:   1oooossss then the set offset bytes (LE) then the set size bytes (LE)
//! insert: 0nnnnnnn then n literal bytes (1..=127)
//! ```
//!
//! Matching indexes the base in fixed blocks and greedily extends each hit.

use crate::artifacts::pack::MAX_PREALLOC;
use crate::errors::RepositoryError;
use std::collections::HashMap;

const BLOCK_SIZE: usize = 16;
const MAX_INSERT: usize = 0x7f;
const MAX_COPY: usize = 0xff_ffff;

/// Encode `target` as a delta against `base`
pub fn create_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut delta = Vec::with_capacity(target.len() / 4 + 16);
    write_size(&mut delta, base.len());
    write_size(&mut delta, target.len());

    // offsets beyond u32 cannot be encoded, so such bases only contribute inserts
    let indexable = if base.len() <= u32::MAX as usize { base.len() } else { 0 };
    let mut blocks: HashMap<&[u8], usize> = HashMap::new();
    for start in (0..indexable.saturating_sub(BLOCK_SIZE - 1)).step_by(BLOCK_SIZE) {
        blocks.entry(&base[start..start + BLOCK_SIZE]).or_insert(start);
    }

    let mut literal = Vec::with_capacity(MAX_INSERT);
    let mut position = 0;

    while position < target.len() {
        let hit = (position + BLOCK_SIZE <= target.len())
            .then(|| blocks.get(&target[position..position + BLOCK_SIZE]))
            .flatten();

        match hit {
            Some(&start) => {
                let mut length = BLOCK_SIZE;
                while start + length < indexable
                    && position + length < target.len()
                    && length < MAX_COPY
                    && base[start + length] == target[position + length]
                {
                    length += 1;
                }

                flush_literal(&mut delta, &mut literal);
                write_copy(&mut delta, start, length);
                position += length;
            }
            None => {
                literal.push(target[position]);
                if literal.len() == MAX_INSERT {
                    flush_literal(&mut delta, &mut literal);
                }
                position += 1;
            }
        }
    }
    flush_literal(&mut delta, &mut literal);

    delta
}

/// Rebuild the target buffer from `base` and a delta
pub fn apply_delta(base: &[u8], delta: &[u8]) -> anyhow::Result<Vec<u8>> {
    let corrupt = |reason: &str| RepositoryError::InvalidObject(format!("bad delta: {reason}"));

    let mut cursor = 0;
    let base_size = read_size(delta, &mut cursor).ok_or_else(|| corrupt("truncated header"))?;
    let target_size = read_size(delta, &mut cursor).ok_or_else(|| corrupt("truncated header"))?;
    if base_size != base.len() {
        return Err(corrupt("base size mismatch").into());
    }

    let mut target = Vec::with_capacity(target_size.min(MAX_PREALLOC));

    while cursor < delta.len() {
        let command = delta[cursor];
        cursor += 1;

        if command & 0x80 != 0 {
            let mut offset = 0usize;
            for i in 0..4 {
                if command & (1 << i) != 0 {
                    let byte = *delta.get(cursor).ok_or_else(|| corrupt("truncated copy"))?;
                    offset |= (byte as usize) << (8 * i);
                    cursor += 1;
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if command & (0x10 << i) != 0 {
                    let byte = *delta.get(cursor).ok_or_else(|| corrupt("truncated copy"))?;
                    size |= (byte as usize) << (8 * i);
                    cursor += 1;
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let chunk = base
                .get(offset..offset + size)
                .ok_or_else(|| corrupt("copy outside base"))?;
            if chunk.len() > target_size - target.len() {
                return Err(corrupt("result larger than declared").into());
            }
            target.extend_from_slice(chunk);
        } else if command != 0 {
            let size = command as usize;
            let chunk = delta
                .get(cursor..cursor + size)
                .ok_or_else(|| corrupt("truncated insert"))?;
            if chunk.len() > target_size - target.len() {
                return Err(corrupt("result larger than declared").into());
            }
            target.extend_from_slice(chunk);
            cursor += size;
        } else {
            return Err(corrupt("reserved instruction").into());
        }
    }

    if target.len() != target_size {
        return Err(corrupt("result size mismatch").into());
    }

    Ok(target)
}

fn flush_literal(delta: &mut Vec<u8>, literal: &mut Vec<u8>) {
    if literal.is_empty() {
        return;
    }
    delta.push(literal.len() as u8);
    delta.append(literal);
}

fn write_copy(delta: &mut Vec<u8>, offset: usize, size: usize) {
    let mut command = 0x80u8;
    let mut operands = Vec::with_capacity(7);

    for i in 0..4 {
        let byte = ((offset >> (8 * i)) & 0xff) as u8;
        if byte != 0 {
            command |= 1 << i;
            operands.push(byte);
        }
    }
    for i in 0..3 {
        let byte = ((size >> (8 * i)) & 0xff) as u8;
        if byte != 0 {
            command |= 0x10 << i;
            operands.push(byte);
        }
    }

    delta.push(command);
    delta.extend(operands);
}

fn write_size(delta: &mut Vec<u8>, mut size: usize) {
    loop {
        let byte = (size & 0x7f) as u8;
        size >>= 7;
        if size == 0 {
            delta.push(byte);
            return;
        }
        delta.push(byte | 0x80);
    }
}

/// Little-endian base-128 varint; `None` when truncated or wider than `usize`
fn read_size(delta: &[u8], cursor: &mut usize) -> Option<usize> {
    let mut size = 0usize;
    let mut shift = 0u32;
    loop {
        let byte = *delta.get(*cursor)?;
        *cursor += 1;
        let bits = (byte & 0x7f) as usize;
        if shift >= usize::BITS || (bits << shift) >> shift != bits {
            return None;
        }
        size |= bits << shift;
        if byte & 0x80 == 0 {
            return Some(size);
        }
        shift += 7;
    }
}
