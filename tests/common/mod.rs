#![allow(dead_code)]

use carlink::CarBlock;
use cid::Cid;
use cid::multihash::Multihash;

pub fn test_cid(seed: u8) -> Cid {
    let mh = Multihash::<64>::wrap(0x12, &[seed; 32]).unwrap();
    Cid::new_v1(0x55, mh)
}

pub fn test_block(seed: u8) -> CarBlock {
    CarBlock {
        cid: test_cid(seed),
        data: vec![seed; 4],
    }
}

pub fn push_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// DAG-CBOR `{"roots": [], "version": 1}` header.
fn v1_header() -> Vec<u8> {
    let mut map = vec![0xa2, 0x65];
    map.extend_from_slice(b"roots");
    map.push(0x80);
    map.push(0x67);
    map.extend_from_slice(b"version");
    map.push(0x01);
    map
}

pub fn build_car_v1(blocks: &[CarBlock]) -> Vec<u8> {
    let header = v1_header();
    let mut out = Vec::new();
    push_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);
    for block in blocks {
        let cid_bytes = block.cid.to_bytes();
        push_varint(&mut out, (cid_bytes.len() + block.data.len()) as u64);
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(&block.data);
    }
    out
}

pub fn build_car_v2(blocks: &[CarBlock]) -> Vec<u8> {
    const PRAGMA: [u8; 11] = [
        0x0a, 0xa1, 0x67, 0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, 0x02,
    ];
    let payload = build_car_v1(blocks);
    let mut out = Vec::new();
    out.extend_from_slice(&PRAGMA);
    let data_offset = PRAGMA.len() as u64 + 40;
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&data_offset.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&(data_offset + payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&payload);
    // Trailing bytes standing in for an index; readers must never parse them.
    out.extend_from_slice(&[0xee; 32]);
    out
}
