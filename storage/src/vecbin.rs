//! Binary codec for `vec.bin`:
//!
//! ```text
//! header:  version:u32 | vector_count:u32 | has_default_dim:u8 | default_dimension:u32
//! record*: id_kind:u8 | id (u64 or len-prefixed utf8) | dimension:u32 | f32[dimension]
//! ```

use nbase_common::{NbaseError, Result, VectorId};

pub const VEC_BIN_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VecBinHeader {
    pub version: u32,
    pub vector_count: u32,
    pub default_dimension: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VecRecord {
    pub id: VectorId,
    pub vector: Vec<f32>,
}

const ID_KIND_INT: u8 = 0;
const ID_KIND_STR: u8 = 1;

pub fn encode_all(header: &VecBinHeader, records: &[VecRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&header.version.to_le_bytes());
    out.extend_from_slice(&header.vector_count.to_le_bytes());
    match header.default_dimension {
        Some(d) => {
            out.push(1);
            out.extend_from_slice(&d.to_le_bytes());
        }
        None => {
            out.push(0);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }

    for record in records {
        encode_record(record, &mut out);
    }
    out
}

fn encode_record(record: &VecRecord, out: &mut Vec<u8>) {
    match &record.id {
        VectorId::Int(n) => {
            out.push(ID_KIND_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        VectorId::Str(s) => {
            out.push(ID_KIND_STR);
            let bytes = s.as_bytes();
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(bytes);
        }
    }
    out.extend_from_slice(&(record.vector.len() as u32).to_le_bytes());
    for f in &record.vector {
        out.extend_from_slice(&f.to_le_bytes());
    }
}

pub fn decode_all(bytes: &[u8]) -> Result<(VecBinHeader, Vec<VecRecord>)> {
    let mut cur = Cursor::new(bytes);
    let version = cur.read_u32()?;
    let vector_count = cur.read_u32()?;
    let has_default = cur.read_u8()?;
    let default_raw = cur.read_u32()?;
    let default_dimension = if has_default == 1 {
        Some(default_raw)
    } else {
        None
    };
    let header = VecBinHeader {
        version,
        vector_count,
        default_dimension,
    };

    let mut records = Vec::with_capacity(vector_count as usize);
    while cur.remaining() > 0 {
        records.push(decode_record(&mut cur)?);
    }
    Ok((header, records))
}

fn decode_record(cur: &mut Cursor) -> Result<VecRecord> {
    let id_kind = cur.read_u8()?;
    let id = match id_kind {
        ID_KIND_INT => VectorId::Int(cur.read_u64()?),
        ID_KIND_STR => {
            let len = cur.read_u32()? as usize;
            VectorId::Str(cur.read_utf8(len)?)
        }
        other => {
            return Err(NbaseError::Serialization(format!(
                "unknown id_kind byte {other} in vec.bin"
            )))
        }
    };
    let dim = cur.read_u32()? as usize;
    let mut vector = Vec::with_capacity(dim);
    for _ in 0..dim {
        vector.push(cur.read_f32()?);
    }
    Ok(VecRecord { id, vector })
}

/// Minimal byte cursor; avoids pulling in a crate for what is ~20 lines.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(NbaseError::Serialization(
                "unexpected end of vec.bin".to_string(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_utf8(&mut self, len: usize) -> Result<String> {
        let b = self.take(len)?;
        String::from_utf8(b.to_vec())
            .map_err(|e| NbaseError::Serialization(format!("invalid utf8 id: {e}")))
    }
}
