use super::encryption::KdfParams;
use crate::errors::CoreError;

/// Magic bytes of an encrypted ledger snapshot.
pub const MAGIC: &[u8; 4] = b"BLDG";

pub const CURRENT_VERSION: u16 = 1;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// magic(4) + version(2) + kdf(12) + salt(16) + nonce(12) + payload_len(8)
pub const HEADER_LEN: usize = 4 + 2 + 12 + SALT_LEN + NONCE_LEN + 8;

// Bounds on KDF costs read from a file, so a crafted header cannot make
// key derivation allocate or spin without limit.
const MEMORY_COST_KIB: std::ops::RangeInclusive<u32> = 8..=1_048_576;
const TIME_COST: std::ops::RangeInclusive<u32> = 1..=20;
const PARALLELISM: std::ops::RangeInclusive<u32> = 1..=16;

/// Fixed-size header in front of the encrypted payload.
///
/// ```text
/// [BLDG] [version u16] [memory_cost u32] [time_cost u32] [parallelism u32]
/// [salt 16B] [nonce 12B] [payload_len u64] [payload ...]
/// ```
/// All integers little-endian. The encoded header is also the AEAD
/// associated data, so editing any header byte breaks decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u16,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
    pub payload_len: u64,
}

impl SnapshotHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let mut w = Writer::new(&mut out);
        w.put(MAGIC);
        w.put(&self.version.to_le_bytes());
        w.put(&self.kdf.memory_cost.to_le_bytes());
        w.put(&self.kdf.time_cost.to_le_bytes());
        w.put(&self.kdf.parallelism.to_le_bytes());
        w.put(&self.salt);
        w.put(&self.nonce);
        w.put(&self.payload_len.to_le_bytes());
        out
    }

    /// Parse and sanity-check a header. Returns it with the payload bytes.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), CoreError> {
        if data.len() < HEADER_LEN {
            return Err(CoreError::InvalidFileFormat(format!(
                "Snapshot is {} bytes, shorter than its {HEADER_LEN}-byte header",
                data.len()
            )));
        }
        let (head, rest) = data.split_at(HEADER_LEN);
        let mut r = Reader::new(head);

        if &r.take::<4>() != MAGIC {
            return Err(CoreError::InvalidFileFormat(
                "Not a ledger snapshot (bad magic bytes)".into(),
            ));
        }
        let version = u16::from_le_bytes(r.take());
        if version == 0 || version > CURRENT_VERSION {
            return Err(CoreError::UnsupportedVersion(version));
        }

        let kdf = KdfParams {
            memory_cost: u32::from_le_bytes(r.take()),
            time_cost: u32::from_le_bytes(r.take()),
            parallelism: u32::from_le_bytes(r.take()),
        };
        check_kdf(&kdf)?;

        let salt = r.take();
        let nonce = r.take();
        let payload_len = u64::from_le_bytes(r.take());

        let payload = usize::try_from(payload_len)
            .ok()
            .and_then(|len| rest.get(..len))
            .ok_or_else(|| {
                CoreError::InvalidFileFormat(format!(
                    "Snapshot truncated: header announces {payload_len} payload bytes, found {}",
                    rest.len()
                ))
            })?;

        Ok((
            Self {
                version,
                kdf,
                salt,
                nonce,
                payload_len,
            },
            payload,
        ))
    }
}

pub fn check_kdf(kdf: &KdfParams) -> Result<(), CoreError> {
    let checks = [
        ("memory_cost", kdf.memory_cost, &MEMORY_COST_KIB),
        ("time_cost", kdf.time_cost, &TIME_COST),
        ("parallelism", kdf.parallelism, &PARALLELISM),
    ];
    for (name, value, range) in checks {
        if !range.contains(&value) {
            return Err(CoreError::InvalidFileFormat(format!(
                "KDF {name} {value} outside {}..={}",
                range.start(),
                range.end()
            )));
        }
    }
    Ok(())
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

/// Reads fixed-size fields from a slice already checked to be `HEADER_LEN` long.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}
