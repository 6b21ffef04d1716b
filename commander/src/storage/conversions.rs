use anyhow::{Result, anyhow};
use rkyv::{
    Archive,
    api::high::{HighSerializer, HighValidator, to_bytes_with_alloc},
    bytecheck::CheckBytes,
    de::Pool,
    rancor::{Error, Strategy},
    ser::allocator::{Arena, ArenaHandle},
    util::AlignedVec,
};

pub fn serialize_for_db<T>(value: &T) -> Result<AlignedVec>
where
    T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
{
    let mut arena = Arena::new();
    to_bytes_with_alloc::<_, Error>(value, arena.acquire())
        .map_err(|e| anyhow!("Serialization failed: {e}"))
}

/// Validates and deserializes archived bytes read from the database.
///
/// redb hands out unaligned slices, so the bytes are copied into an
/// aligned buffer first.
pub fn deserialize_from_db<T>(bytes: &[u8]) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, Error>>
        + rkyv::Deserialize<T, Strategy<Pool, Error>>,
{
    let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, Error>(&aligned).map_err(|e| anyhow!("Deserialization failed: {e}"))
}
