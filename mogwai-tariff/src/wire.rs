//! Byte-exact tariff wire format
//!
//! Layout: 13 magic bytes `"Mogwai tariff"`, a `u16` format version, then
//! the versioned payload. The version field doubles as a byte-order mark:
//! readers decode it little-endian first and retry big-endian, then read
//! the whole payload in the detected order. Writers always emit
//! little-endian.
//!
//! Version 2 payload: length-prefixed UTF-8 name, `u32` period count, then
//! per period the Unix start/end seconds (`u64`), the IANA zone names of
//! both endpoints (length-prefixed), the repeat type (`u16`), the repeat
//! count (`u32`) and the capacity limit (`u64`).

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use chrono::TimeZone;
use chrono_tz::Tz;

use crate::error::{TariffError, TariffResult};
use crate::period::{Period, RepeatType};
use crate::tariff::Tariff;

/// Magic bytes at the start of every tariff file
pub const MAGIC: &[u8; 13] = b"Mogwai tariff";

/// Current format version
pub const FORMAT_VERSION: u16 = 2;

/// Legacy format version without endpoint zone names; recognized, refused
pub const FORMAT_VERSION_LEGACY: u16 = 1;

/// Detected byte order of a tariff file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireOrder {
    Little,
    Big,
}

impl Tariff {
    /// Serialize to the canonical (little-endian, version 2) byte form
    pub fn to_bytes(&self) -> TariffResult<Vec<u8>> {
        let mut out = Vec::with_capacity(64 + self.periods().len() * 64);
        out.extend_from_slice(MAGIC);
        out.write_u16::<LittleEndian>(FORMAT_VERSION).ok();
        write_string(&mut out, self.name())?;
        out.write_u32::<LittleEndian>(period_count(self.periods().len())?)
            .ok();
        for period in self.periods() {
            write_period(&mut out, period)?;
        }
        Ok(out)
    }
}

fn period_count(len: usize) -> TariffResult<u32> {
    u32::try_from(len)
        .map_err(|_| TariffError::invalid_tariff(format!("too many periods ({})", len)))
}

fn write_string(out: &mut Vec<u8>, s: &str) -> TariffResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| TariffError::invalid_tariff(format!("string too long ({} bytes)", s.len())))?;
    out.write_u16::<LittleEndian>(len).ok();
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_period(out: &mut Vec<u8>, period: &Period) -> TariffResult<()> {
    let unix = |dt: &chrono::DateTime<Tz>| -> TariffResult<u64> {
        u64::try_from(dt.timestamp()).map_err(|_| {
            TariffError::invalid_tariff(format!("period endpoint {} predates the epoch", dt))
        })
    };
    out.write_u64::<LittleEndian>(unix(period.start())?).ok();
    out.write_u64::<LittleEndian>(unix(period.end())?).ok();
    write_string(out, period.start().timezone().name())?;
    write_string(out, period.end().timezone().name())?;
    out.write_u16::<LittleEndian>(period.repeat_type().to_wire())
        .ok();
    out.write_u32::<LittleEndian>(period.repeat_period()).ok();
    out.write_u64::<LittleEndian>(period.capacity_limit()).ok();
    Ok(())
}

/// Cursor over a tariff byte buffer in a detected byte order
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    order: WireOrder,
}

impl<'a> WireReader<'a> {
    /// Check the magic, sense the byte order from the version field, and
    /// position the reader at the start of the payload. Returns the reader
    /// and the declared format version.
    pub(crate) fn new(buf: &'a [u8]) -> TariffResult<(Self, u16)> {
        if buf.len() < MAGIC.len() + 2 {
            return Err(TariffError::invalid_tariff(format!(
                "file too short ({} bytes)",
                buf.len()
            )));
        }
        if &buf[..MAGIC.len()] != MAGIC {
            return Err(TariffError::invalid_tariff("bad magic"));
        }

        let raw = &buf[MAGIC.len()..MAGIC.len() + 2];
        let little = LittleEndian::read_u16(raw);
        let big = BigEndian::read_u16(raw);
        let (order, version) = if known_version(little) {
            (WireOrder::Little, little)
        } else if known_version(big) {
            (WireOrder::Big, big)
        } else {
            return Err(TariffError::invalid_tariff(format!(
                "unrecognized format version ({:#06x})",
                little
            )));
        };

        Ok((
            Self {
                buf,
                pos: MAGIC.len() + 2,
                order,
            },
            version,
        ))
    }

    fn take(&mut self, len: usize) -> TariffResult<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(TariffError::invalid_tariff(format!(
                "truncated file: wanted {} bytes at offset {}",
                len, self.pos
            ))),
        }
    }

    pub(crate) fn read_u16(&mut self) -> TariffResult<u16> {
        let raw = self.take(2)?;
        Ok(match self.order {
            WireOrder::Little => LittleEndian::read_u16(raw),
            WireOrder::Big => BigEndian::read_u16(raw),
        })
    }

    pub(crate) fn read_u32(&mut self) -> TariffResult<u32> {
        let raw = self.take(4)?;
        Ok(match self.order {
            WireOrder::Little => LittleEndian::read_u32(raw),
            WireOrder::Big => BigEndian::read_u32(raw),
        })
    }

    pub(crate) fn read_u64(&mut self) -> TariffResult<u64> {
        let raw = self.take(8)?;
        Ok(match self.order {
            WireOrder::Little => LittleEndian::read_u64(raw),
            WireOrder::Big => BigEndian::read_u64(raw),
        })
    }

    pub(crate) fn read_string(&mut self) -> TariffResult<&'a str> {
        let len = self.read_u16()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map_err(|err| TariffError::invalid_tariff(format!("invalid UTF-8 string: {}", err)))
    }

    pub(crate) fn finish(self) -> TariffResult<()> {
        if self.pos != self.buf.len() {
            return Err(TariffError::invalid_tariff(format!(
                "{} trailing bytes after payload",
                self.buf.len() - self.pos
            )));
        }
        Ok(())
    }
}

fn known_version(version: u16) -> bool {
    version == FORMAT_VERSION || version == FORMAT_VERSION_LEGACY
}

/// Decode one wire period record
pub(crate) fn read_period(reader: &mut WireReader<'_>) -> TariffResult<Period> {
    let start_unix = reader.read_u64()?;
    let end_unix = reader.read_u64()?;
    let start_tz = parse_zone(reader.read_string()?)?;
    let end_tz = parse_zone(reader.read_string()?)?;
    let repeat_raw = reader.read_u16()?;
    let repeat_period = reader.read_u32()?;
    let capacity_limit = reader.read_u64()?;

    let repeat_type = RepeatType::from_wire(repeat_raw).ok_or_else(|| {
        TariffError::invalid_tariff(format!("unknown repeat type code {}", repeat_raw))
    })?;
    let start = zoned_instant(&start_tz, start_unix)?;
    let end = zoned_instant(&end_tz, end_unix)?;

    Period::new(start, end, repeat_type, repeat_period, capacity_limit)
        .map_err(|err| TariffError::invalid_tariff(err.to_string()))
}

fn parse_zone(name: &str) -> TariffResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| TariffError::invalid_tariff(format!("unknown time zone {:?}", name)))
}

fn zoned_instant(tz: &Tz, unix: u64) -> TariffResult<chrono::DateTime<Tz>> {
    let secs = i64::try_from(unix)
        .map_err(|_| TariffError::invalid_tariff(format!("timestamp {} out of range", unix)))?;
    tz.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| TariffError::invalid_tariff(format!("timestamp {} out of range", unix)))
}
