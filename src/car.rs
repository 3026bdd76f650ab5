//! Blocking block reader for CAR (Content Addressable aRchive) files.
//!
//! Handles both CARv1 (varint-prefixed DAG-CBOR header followed by
//! varint-framed sections) and CARv2 (pragma + fixed-size header wrapping an
//! embedded CARv1 payload). A CARv2 index, if present, is never read: the
//! embedded payload is bounded by the data size declared in the header.

use std::io::Read;

use cid::Cid;

use crate::error::CarlinkError;

/// One section of a CAR payload: the block's CID and its raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CarBlock {
    pub cid: Cid,
    pub data: Vec<u8>,
}

/// CARv2 pragma: varint(10) followed by the DAG-CBOR map `{"version": 2}`.
const CARV2_PRAGMA: [u8; 11] = [
    0x0a, 0xa1, 0x67, 0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, 0x02,
];

/// Upper bound on the varint-prefixed header, matching go-car's limit.
const MAX_HEADER_LEN: u64 = 32 << 20;

/// Upper bound on a single section, matching go-car's limit.
const MAX_SECTION_LEN: u64 = 32 << 20;

#[derive(Debug)]
pub struct CarBlockReader<R: Read> {
    payload: std::io::Take<R>,
}

impl<R: Read> CarBlockReader<R> {
    /// Opens a CAR stream, consuming and validating its header(s). The reader
    /// is left positioned at the first section.
    pub fn new(mut inner: R) -> Result<Self, CarlinkError> {
        let header_len = read_varint(&mut inner)?
            .ok_or_else(|| CarlinkError::Car("missing header".to_string()))?;
        if header_len == 0 || header_len > MAX_HEADER_LEN {
            return Err(CarlinkError::Car(format!(
                "invalid header length {}",
                header_len
            )));
        }
        let mut header = vec![0u8; header_len as usize];
        inner.read_exact(&mut header)?;

        if header_len == 10 && header.as_slice() == &CARV2_PRAGMA[1..] {
            // CARv2: fixed 40-byte header, then the embedded CARv1 payload at
            // the declared offset.
            let mut v2_header = [0u8; 40];
            inner.read_exact(&mut v2_header)?;
            let data_offset = u64::from_le_bytes(v2_header[16..24].try_into().unwrap());
            let data_size = u64::from_le_bytes(v2_header[24..32].try_into().unwrap());
            let consumed = CARV2_PRAGMA.len() as u64 + 40;
            if data_offset < consumed {
                return Err(CarlinkError::Car(format!(
                    "data offset {} overlaps the header",
                    data_offset
                )));
            }
            skip(&mut inner, data_offset - consumed)?;
            let mut payload = inner.take(data_size);
            check_v1_header(&mut payload)?;
            Ok(Self { payload })
        } else {
            let version = header_version(&header)?;
            if version != 1 {
                return Err(CarlinkError::Car(format!(
                    "unsupported CAR version {}",
                    version
                )));
            }
            Ok(Self {
                payload: inner.take(u64::MAX),
            })
        }
    }

    /// Reads the next section. `Ok(None)` signals a clean end of stream.
    pub fn next_block(&mut self) -> Result<Option<CarBlock>, CarlinkError> {
        let len = match read_varint(&mut self.payload)? {
            None => return Ok(None),
            Some(len) => len,
        };
        if len == 0 {
            return Err(CarlinkError::Car("zero-length section".to_string()));
        }
        if len > MAX_SECTION_LEN {
            return Err(CarlinkError::Car(format!(
                "section length {} exceeds maximum",
                len
            )));
        }
        let mut section = vec![0u8; len as usize];
        self.payload
            .read_exact(&mut section)
            .map_err(|e| CarlinkError::Car(format!("truncated section: {}", e)))?;
        let mut cursor: &[u8] = &section;
        let cid = Cid::read_bytes(&mut cursor)?;
        Ok(Some(CarBlock {
            cid,
            data: cursor.to_vec(),
        }))
    }
}

impl<R: Read> Iterator for CarBlockReader<R> {
    type Item = Result<CarBlock, CarlinkError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

/// Consumes and validates the varint-prefixed CARv1 header of an embedded
/// payload.
fn check_v1_header<R: Read>(payload: &mut R) -> Result<(), CarlinkError> {
    let len = read_varint(payload)?
        .ok_or_else(|| CarlinkError::Car("missing inner header".to_string()))?;
    if len == 0 || len > MAX_HEADER_LEN {
        return Err(CarlinkError::Car(format!(
            "invalid inner header length {}",
            len
        )));
    }
    let mut header = vec![0u8; len as usize];
    payload.read_exact(&mut header)?;
    let version = header_version(&header)?;
    if version != 1 {
        return Err(CarlinkError::Car(format!(
            "unsupported inner CAR version {}",
            version
        )));
    }
    Ok(())
}

/// Decodes a LEB128 unsigned varint from a byte stream. Returns `Ok(None)` on
/// end-of-stream before the first byte; a truncated varint is an error.
fn read_varint<R: Read>(r: &mut R) -> Result<Option<u64>, CarlinkError> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    loop {
        let mut byte = [0u8; 1];
        match r.read(&mut byte)? {
            0 if shift == 0 => return Ok(None),
            0 => return Err(CarlinkError::Car("truncated varint".to_string())),
            _ => {}
        }
        let payload = (byte[0] & 0x7F) as u64;
        // At shift 63 only a final byte of 0 or 1 still fits in a u64.
        if shift >= 63 && (payload > 1 || byte[0] & 0x80 != 0) {
            return Err(CarlinkError::Car("varint overflow".to_string()));
        }
        result |= payload << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(result));
        }
        shift += 7;
    }
}

/// Discards exactly `n` bytes from the reader.
fn skip<R: Read>(r: &mut R, n: u64) -> Result<(), CarlinkError> {
    let copied = std::io::copy(&mut r.take(n), &mut std::io::sink())?;
    if copied != n {
        return Err(CarlinkError::Car("truncated padding".to_string()));
    }
    Ok(())
}

/// Extracts the `version` value from a CARv1 DAG-CBOR header map. Only the
/// small, definite-length shapes go-car emits are accepted.
fn header_version(header: &[u8]) -> Result<u64, CarlinkError> {
    let mut pos = 0usize;
    let (major, arg) = read_cbor_head(header, &mut pos)?;
    if major != 5 {
        return Err(CarlinkError::Car("header is not a CBOR map".to_string()));
    }
    for _ in 0..arg {
        let (key_major, key_len) = read_cbor_head(header, &mut pos)?;
        if key_major != 3 {
            return Err(CarlinkError::Car("non-text header key".to_string()));
        }
        let key = take_bytes(header, &mut pos, key_len)?;
        if key == b"version" {
            let (val_major, val) = read_cbor_head(header, &mut pos)?;
            if val_major != 0 {
                return Err(CarlinkError::Car("non-integer header version".to_string()));
            }
            return Ok(val);
        }
        skip_cbor_value(header, &mut pos)?;
    }
    Err(CarlinkError::Car("header has no version field".to_string()))
}

/// Reads one CBOR initial byte plus its argument, returning (major type,
/// argument). Indefinite lengths are rejected.
fn read_cbor_head(buf: &[u8], pos: &mut usize) -> Result<(u8, u64), CarlinkError> {
    let byte = *buf
        .get(*pos)
        .ok_or_else(|| CarlinkError::Car("truncated header".to_string()))?;
    *pos += 1;
    let major = byte >> 5;
    let info = byte & 0x1F;
    let arg = match info {
        0..=23 => info as u64,
        24 => take_bytes(buf, pos, 1)?[0] as u64,
        25 => u16::from_be_bytes(take_bytes(buf, pos, 2)?.try_into().unwrap()) as u64,
        26 => u32::from_be_bytes(take_bytes(buf, pos, 4)?.try_into().unwrap()) as u64,
        27 => u64::from_be_bytes(take_bytes(buf, pos, 8)?.try_into().unwrap()),
        _ => {
            return Err(CarlinkError::Car(
                "unsupported CBOR length encoding in header".to_string(),
            ));
        }
    };
    Ok((major, arg))
}

/// Skips one complete CBOR value, recursing into arrays, maps, and tags.
fn skip_cbor_value(buf: &[u8], pos: &mut usize) -> Result<(), CarlinkError> {
    let (major, arg) = read_cbor_head(buf, pos)?;
    match major {
        0 | 1 | 7 => {}
        2 | 3 => {
            take_bytes(buf, pos, arg)?;
        }
        4 => {
            for _ in 0..arg {
                skip_cbor_value(buf, pos)?;
            }
        }
        5 => {
            for _ in 0..arg {
                skip_cbor_value(buf, pos)?;
                skip_cbor_value(buf, pos)?;
            }
        }
        6 => {
            skip_cbor_value(buf, pos)?;
        }
        _ => unreachable!(),
    }
    Ok(())
}

fn take_bytes<'a>(buf: &'a [u8], pos: &mut usize, n: u64) -> Result<&'a [u8], CarlinkError> {
    let n = n as usize;
    let end = pos
        .checked_add(n)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| CarlinkError::Car("truncated header".to_string()))?;
    let slice = &buf[*pos..end];
    *pos = end;
    Ok(slice)
}
