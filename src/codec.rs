//! Binary Codec - checkpoint manifests and partition files
//!
//! Hand-rolled little-endian serialization, one format per file kind.
//!
//! ## Wire Format
//!
//! ```text
//! [Header 16B] [Body]
//!
//! Header: [magic 4][version u16][flags u16][total_size u32][crc32 u32]
//! ```
//!
//! The CRC32 covers every byte after the header. With `FLAG_ZSTD` set the body
//! is a zstd frame wrapping the payload. Floats are written as IEEE-754 bits.
//!
//! Manifest payload:
//!
//! ```text
//! [sequence u64][engine_id 16B][created_at][step u64][next_cluster_id u32]
//! [Codebook][ClusterMeta x N][PartitionRef x M]
//! ```
//!
//! Partition payload:
//!
//! ```text
//! [partition u32][NeuronRecord x N]
//! NeuronRecord: [id u64][region u32][importance f32][usage u32][created_at]
//!               [last_activated opt][(target u64, weight f32, last_used u64) x S]
//! ```

use std::io::{Cursor, Read};

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::cluster::ClusterMeta;
use crate::error::{Error, Result};
use crate::graph::Synapse;
use crate::neuron::{ClusterId, NeuronId, NeuronRecord};
use crate::quantizer::Codebook;
use crate::snapshot::{Manifest, PartitionData, PartitionRef};

// ── Constants ──────────────────────────────────────────────────────

const MANIFEST_MAGIC: &[u8; 4] = b"NGMF";
const PARTITION_MAGIC: &[u8; 4] = b"NGPT";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 16;

/// Body is zstd-compressed
const FLAG_ZSTD: u16 = 0x0001;
const ZSTD_LEVEL: i32 = 3;

/// Upper bound on up-front allocation for any decoded collection
const MAX_PREALLOC: usize = 1 << 16;

// ── Public API ─────────────────────────────────────────────────────

/// Encode a checkpoint manifest.
pub fn encode_manifest(manifest: &Manifest) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4096);

    write_u64(&mut buf, manifest.sequence);
    write_bytes(&mut buf, manifest.engine_id.as_bytes());
    write_timestamp(&mut buf, &manifest.created_at);
    write_u64(&mut buf, manifest.step);
    write_u32(&mut buf, manifest.next_cluster_id);

    write_codebook(&mut buf, &manifest.codebook)?;

    write_len(&mut buf, manifest.clusters.len())?;
    for meta in &manifest.clusters {
        write_cluster_meta(&mut buf, meta)?;
    }

    write_len(&mut buf, manifest.partitions.len())?;
    for part in &manifest.partitions {
        write_u32(&mut buf, part.id);
        write_u64(&mut buf, part.generation);
    }

    frame(MANIFEST_MAGIC, &buf)
}

/// Decode a checkpoint manifest.
pub fn decode_manifest(data: &[u8]) -> Result<Manifest> {
    let payload = unframe(MANIFEST_MAGIC, data)?;
    let mut r = Cursor::new(payload.as_slice());

    let sequence = read_u64(&mut r)?;
    let mut id_bytes = [0u8; 16];
    r.read_exact(&mut id_bytes)
        .map_err(|e| Error::Deserialization(format!("engine id: {}", e)))?;
    let engine_id = Uuid::from_bytes(id_bytes);
    let created_at = read_timestamp(&mut r)?;
    let step = read_u64(&mut r)?;
    let next_cluster_id = read_u32(&mut r)?;

    let codebook = read_codebook(&mut r)?;

    let count = read_u32(&mut r)? as usize;
    let mut clusters = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        clusters.push(read_cluster_meta(&mut r)?);
    }

    let count = read_u32(&mut r)? as usize;
    let mut partitions = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        let id = read_u32(&mut r)?;
        let generation = read_u64(&mut r)?;
        partitions.push(PartitionRef { id, generation });
    }

    expect_end(&r, "manifest")?;

    Ok(Manifest {
        sequence,
        engine_id,
        created_at,
        step,
        next_cluster_id,
        codebook,
        clusters,
        partitions,
    })
}

/// Encode one partition generation.
pub fn encode_partition(data: &PartitionData) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 * data.neurons.len() + 16);

    write_u32(&mut buf, data.id);
    write_len(&mut buf, data.neurons.len())?;
    for record in &data.neurons {
        write_neuron_record(&mut buf, record)?;
    }

    frame(PARTITION_MAGIC, &buf)
}

/// Decode one partition generation.
pub fn decode_partition(data: &[u8]) -> Result<PartitionData> {
    let payload = unframe(PARTITION_MAGIC, data)?;
    let mut r = Cursor::new(payload.as_slice());

    let id = read_u32(&mut r)?;
    let count = read_u32(&mut r)? as usize;
    let mut neurons = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        neurons.push(read_neuron_record(&mut r)?);
    }

    expect_end(&r, "partition")?;

    Ok(PartitionData { id, neurons })
}

// ── Framing ────────────────────────────────────────────────────────

fn frame(magic: &[u8; 4], payload: &[u8]) -> Result<Vec<u8>> {
    let body = zstd::encode_all(payload, ZSTD_LEVEL).map_err(|e| Error::Compression(e.to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    write_bytes(&mut buf, magic);
    write_u16(&mut buf, VERSION);
    write_u16(&mut buf, FLAG_ZSTD);
    write_u32(&mut buf, 0); // total_size placeholder
    write_u32(&mut buf, 0); // checksum placeholder
    write_bytes(&mut buf, &body);

    let total_size = u32::try_from(buf.len())
        .map_err(|_| Error::Serialization(format!("file too large: {} bytes", buf.len())))?;
    buf[8..12].copy_from_slice(&total_size.to_le_bytes());

    let checksum = crc32fast::hash(&buf[HEADER_LEN..]);
    buf[12..16].copy_from_slice(&checksum.to_le_bytes());

    Ok(buf)
}

fn unframe(magic: &[u8; 4], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(Error::Deserialization("file too short".into()));
    }
    let mut r = Cursor::new(data);

    let mut found = [0u8; 4];
    r.read_exact(&mut found)
        .map_err(|e| Error::Deserialization(format!("header magic: {}", e)))?;
    if &found != magic {
        return Err(Error::Deserialization(format!(
            "invalid magic: expected {:?}",
            String::from_utf8_lossy(magic)
        )));
    }

    let version = read_u16(&mut r)?;
    if version != VERSION {
        return Err(Error::Deserialization(format!("unsupported version: {}", version)));
    }

    let flags = read_u16(&mut r)?;
    let total_size = read_u32(&mut r)?;
    let stored_checksum = read_u32(&mut r)?;

    if total_size as usize != data.len() {
        return Err(Error::Deserialization(format!(
            "size mismatch: header says {} but file is {} bytes",
            total_size,
            data.len()
        )));
    }

    let computed_checksum = crc32fast::hash(&data[HEADER_LEN..]);
    if stored_checksum != computed_checksum {
        return Err(Error::Deserialization(format!(
            "checksum mismatch: stored={}, computed={}",
            stored_checksum, computed_checksum
        )));
    }

    let body = &data[HEADER_LEN..];
    if flags & FLAG_ZSTD != 0 {
        zstd::decode_all(body).map_err(|e| Error::Decompression(e.to_string()))
    } else {
        Ok(body.to_vec())
    }
}

fn expect_end(r: &Cursor<&[u8]>, what: &str) -> Result<()> {
    let remaining = r.get_ref().len() as u64 - r.position();
    if remaining != 0 {
        return Err(Error::Deserialization(format!("{}: {} trailing bytes", what, remaining)));
    }
    Ok(())
}

// ── Write primitives ───────────────────────────────────────────────

fn write_u8(w: &mut Vec<u8>, v: u8) {
    w.push(v);
}

fn write_u16(w: &mut Vec<u8>, v: u16) {
    w.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(w: &mut Vec<u8>, v: u32) {
    w.extend_from_slice(&v.to_le_bytes());
}

fn write_u64(w: &mut Vec<u8>, v: u64) {
    w.extend_from_slice(&v.to_le_bytes());
}

fn write_i64(w: &mut Vec<u8>, v: i64) {
    w.extend_from_slice(&v.to_le_bytes());
}

fn write_f32(w: &mut Vec<u8>, v: f32) {
    let v = if v.is_finite() { v } else { 0.0 };
    w.extend_from_slice(&v.to_bits().to_le_bytes());
}

fn write_bytes(w: &mut Vec<u8>, data: &[u8]) {
    w.extend_from_slice(data);
}

fn write_len(w: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::Serialization(format!("collection too large: {}", len)))?;
    write_u32(w, len);
    Ok(())
}

fn write_f32s(w: &mut Vec<u8>, values: &[f32]) -> Result<()> {
    write_len(w, values.len())?;
    for v in values {
        write_f32(w, *v);
    }
    Ok(())
}

// ── Read primitives ────────────────────────────────────────────────

fn read_u8(r: &mut Cursor<&[u8]>) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf).map_err(|e| Error::Deserialization(format!("read u8: {}", e)))?;
    Ok(buf[0])
}

fn read_u16(r: &mut Cursor<&[u8]>) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(|e| Error::Deserialization(format!("read u16: {}", e)))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(|e| Error::Deserialization(format!("read u32: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut Cursor<&[u8]>) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| Error::Deserialization(format!("read u64: {}", e)))?;
    Ok(u64::from_le_bytes(buf))
}

fn read_i64(r: &mut Cursor<&[u8]>) -> Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| Error::Deserialization(format!("read i64: {}", e)))?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f32(r: &mut Cursor<&[u8]>) -> Result<f32> {
    let v = f32::from_bits(read_u32(r)?);
    Ok(if v.is_finite() { v } else { 0.0 })
}

fn read_f32s(r: &mut Cursor<&[u8]>) -> Result<Vec<f32>> {
    let count = read_u32(r)? as usize;
    let mut values = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        values.push(read_f32(r)?);
    }
    Ok(values)
}

// ── Timestamp helpers ──────────────────────────────────────────────

fn write_timestamp(w: &mut Vec<u8>, ts: &DateTime<Utc>) {
    write_i64(w, ts.timestamp());
    write_u32(w, ts.timestamp_subsec_nanos());
}

fn read_timestamp(r: &mut Cursor<&[u8]>) -> Result<DateTime<Utc>> {
    let secs = read_i64(r)?;
    let nanos = read_u32(r)?;
    Utc.timestamp_opt(secs, nanos)
        .single()
        .ok_or_else(|| Error::Deserialization(format!("invalid timestamp: {}s {}ns", secs, nanos)))
}

fn write_opt_timestamp(w: &mut Vec<u8>, ts: &Option<DateTime<Utc>>) {
    match ts {
        Some(ts) => {
            write_u8(w, 1);
            write_timestamp(w, ts);
        }
        None => write_u8(w, 0),
    }
}

fn read_opt_timestamp(r: &mut Cursor<&[u8]>) -> Result<Option<DateTime<Utc>>> {
    match read_u8(r)? {
        0 => Ok(None),
        1 => Ok(Some(read_timestamp(r)?)),
        tag => Err(Error::Deserialization(format!("invalid option tag: {}", tag))),
    }
}

// ── Section encoders ───────────────────────────────────────────────

fn write_codebook(w: &mut Vec<u8>, codebook: &Codebook) -> Result<()> {
    write_len(w, codebook.dim)?;
    write_len(w, codebook.capacity)?;
    write_f32(w, codebook.ema_decay);
    write_u64(w, codebook.step);

    write_len(w, codebook.codes.len())?;
    for (i, code) in codebook.codes.iter().enumerate() {
        if code.len() != codebook.dim {
            return Err(Error::Serialization(format!(
                "code {} has {} dims, expected {}",
                i,
                code.len(),
                codebook.dim
            )));
        }
        for v in code {
            write_f32(w, *v);
        }
        write_u64(w, codebook.usage.get(i).copied().unwrap_or(0));
        write_u64(w, codebook.last_used.get(i).copied().unwrap_or(0));
    }
    Ok(())
}

fn read_codebook(r: &mut Cursor<&[u8]>) -> Result<Codebook> {
    let dim = read_u32(r)? as usize;
    let capacity = read_u32(r)? as usize;
    let ema_decay = read_f32(r)?;
    let step = read_u64(r)?;

    let count = read_u32(r)? as usize;
    if count > capacity {
        return Err(Error::Deserialization(format!(
            "codebook holds {} codes but capacity is {}",
            count, capacity
        )));
    }
    let mut codebook = Codebook::new(dim, capacity, ema_decay);
    codebook.step = step;
    for _ in 0..count {
        let mut code = Vec::with_capacity(dim.min(MAX_PREALLOC));
        for _ in 0..dim {
            code.push(read_f32(r)?);
        }
        codebook.codes.push(code);
        codebook.usage.push(read_u64(r)?);
        codebook.last_used.push(read_u64(r)?);
    }
    Ok(codebook)
}

fn write_cluster_meta(w: &mut Vec<u8>, meta: &ClusterMeta) -> Result<()> {
    write_u32(w, meta.id.0);
    write_u32(w, meta.region);
    write_f32s(w, &meta.centroid)?;
    write_u64(w, meta.sample_count);
    write_f32(w, meta.complexity);
    write_u32(w, meta.next_ordinal);
    write_len(w, meta.members.len())?;
    for ordinal in &meta.members {
        write_u32(w, *ordinal);
    }
    write_timestamp(w, &meta.created_at);
    Ok(())
}

fn read_cluster_meta(r: &mut Cursor<&[u8]>) -> Result<ClusterMeta> {
    let id = ClusterId(read_u32(r)?);
    let region = read_u32(r)?;
    let centroid = read_f32s(r)?;
    let sample_count = read_u64(r)?;
    let complexity = read_f32(r)?;
    let next_ordinal = read_u32(r)?;

    let count = read_u32(r)? as usize;
    let mut members = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        let ordinal = read_u32(r)?;
        if ordinal >= next_ordinal {
            return Err(Error::Deserialization(format!(
                "cluster {} member {} beyond next ordinal {}",
                id, ordinal, next_ordinal
            )));
        }
        members.push(ordinal);
    }
    let created_at = read_timestamp(r)?;

    Ok(ClusterMeta {
        id,
        region,
        centroid,
        sample_count,
        complexity,
        next_ordinal,
        members,
        created_at,
    })
}

fn write_neuron_record(w: &mut Vec<u8>, record: &NeuronRecord) -> Result<()> {
    write_u64(w, record.id.raw());
    write_u32(w, record.region);
    write_f32(w, record.importance);
    write_u32(w, record.usage);
    write_timestamp(w, &record.created_at);
    write_opt_timestamp(w, &record.last_activated);

    write_len(w, record.synapses.len())?;
    for (target, synapse) in &record.synapses {
        write_u64(w, target.raw());
        write_f32(w, synapse.weight);
        write_u64(w, synapse.last_used);
    }
    Ok(())
}

fn read_neuron_record(r: &mut Cursor<&[u8]>) -> Result<NeuronRecord> {
    let id = NeuronId::from_raw(read_u64(r)?);
    let region = read_u32(r)?;
    let importance = read_f32(r)?;
    let usage = read_u32(r)?;
    let created_at = read_timestamp(r)?;
    let last_activated = read_opt_timestamp(r)?;

    let count = read_u32(r)? as usize;
    let mut synapses = Vec::with_capacity(count.min(MAX_PREALLOC));
    for _ in 0..count {
        let target = NeuronId::from_raw(read_u64(r)?);
        let weight = read_f32(r)?;
        let last_used = read_u64(r)?;
        synapses.push((target, Synapse { weight, last_used }));
    }

    Ok(NeuronRecord {
        id,
        region,
        importance,
        usage,
        created_at,
        last_activated,
        synapses,
    })
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{encode, FEATURE_DIM};

    fn sample_manifest() -> Manifest {
        let mut codebook = Codebook::new(FEATURE_DIM, 8, 0.95);
        for word in ["cat", "dog"] {
            codebook.codes.push(encode(word).as_slice().to_vec());
            codebook.usage.push(3);
            codebook.last_used.push(1);
        }
        codebook.step = 2;

        Manifest {
            sequence: 7,
            engine_id: Uuid::new_v4(),
            created_at: Utc::now(),
            step: 42,
            next_cluster_id: 2,
            codebook,
            clusters: vec![ClusterMeta {
                id: ClusterId(1),
                region: 1,
                centroid: encode("dog").as_slice().to_vec(),
                sample_count: 5,
                complexity: 0.25,
                next_ordinal: 6,
                members: vec![0, 1, 2, 3, 4, 5],
                created_at: Utc::now(),
            }],
            partitions: vec![PartitionRef { id: 0, generation: 3 }],
        }
    }

    fn sample_partition() -> PartitionData {
        let neurons = (0..4)
            .map(|i| NeuronRecord {
                id: NeuronId::new(ClusterId(1), i),
                region: 1,
                importance: 0.1 * i as f32,
                usage: i,
                created_at: Utc::now(),
                last_activated: if i % 2 == 0 { Some(Utc::now()) } else { None },
                synapses: vec![(
                    NeuronId::new(ClusterId(1), (i + 1) % 4),
                    Synapse {
                        weight: 0.25,
                        last_used: 9,
                    },
                )],
            })
            .collect();
        PartitionData { id: 0, neurons }
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = sample_manifest();
        let encoded = encode_manifest(&manifest).unwrap();
        assert_eq!(&encoded[0..4], b"NGMF");
        assert_eq!(u16::from_le_bytes([encoded[4], encoded[5]]), 1);

        let decoded = decode_manifest(&encoded).unwrap();
        assert_eq!(decoded, manifest);
    }

    #[test]
    fn test_partition_round_trip() {
        let data = sample_partition();
        let decoded = decode_partition(&encode_partition(&data).unwrap()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let encoded = encode_partition(&sample_partition()).unwrap();
        assert!(decode_manifest(&encoded).is_err());
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let mut encoded = encode_manifest(&sample_manifest()).unwrap();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        assert!(decode_manifest(&encoded).is_err());
    }

    #[test]
    fn test_truncated_rejected() {
        let encoded = encode_partition(&sample_partition()).unwrap();
        assert!(decode_partition(&encoded[..encoded.len() / 2]).is_err());
        assert!(decode_partition(&encoded[..8]).is_err());
    }

    #[test]
    fn test_non_finite_written_as_zero() {
        let mut data = sample_partition();
        data.neurons[0].importance = f32::NAN;
        data.neurons[0].synapses[0].1.weight = f32::INFINITY;
        let decoded = decode_partition(&encode_partition(&data).unwrap()).unwrap();
        assert_eq!(decoded.neurons[0].importance, 0.0);
        assert_eq!(decoded.neurons[0].synapses[0].1.weight, 0.0);
    }

    #[test]
    fn test_compression_shrinks_repetitive_payloads() {
        let mut data = sample_partition();
        for record in &mut data.neurons {
            for t in 0..500 {
                record.synapses.push((
                    NeuronId::new(ClusterId(2), t),
                    Synapse {
                        weight: 0.5,
                        last_used: 1,
                    },
                ));
            }
        }
        let raw_estimate = data.neurons.len() * 500 * 20;
        let encoded = encode_partition(&data).unwrap();
        assert!(encoded.len() < raw_estimate / 2, "{} bytes", encoded.len());
    }
}
