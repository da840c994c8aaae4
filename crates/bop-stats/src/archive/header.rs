use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use super::format::{ARCHIVE_VERSION, HEADER_TOKEN, read_utf};
use super::output::ArchiveBuffer;
use crate::error::{StatsError, StatsResult};
use crate::registry::now_millis;

/// Process and host metadata written at the start of every archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u8,
    pub creation_ms: i64,
    pub process_id: i64,
    pub process_start_ms: i64,
    /// Local offset from UTC in milliseconds, positive east of Greenwich.
    pub utc_offset_ms: i32,
    pub timezone: String,
    pub system_directory: String,
    pub product_description: String,
    pub os_name: String,
    pub machine: String,
}

impl ArchiveHeader {
    /// Captures the current time, timezone and host description.
    pub fn capture(
        process_id: i64,
        process_start_ms: i64,
        system_directory: &str,
        product_description: &str,
    ) -> Self {
        let now = chrono::Local::now();
        let (os_name, machine) = host_description();
        Self {
            version: ARCHIVE_VERSION,
            creation_ms: now_millis(),
            process_id,
            process_start_ms,
            utc_offset_ms: now.offset().local_minus_utc().saturating_mul(1000),
            timezone: now.format("%Z").to_string(),
            system_directory: system_directory.to_string(),
            product_description: product_description.to_string(),
            os_name,
            machine,
        }
    }

    pub fn encode(&self, out: &mut ArchiveBuffer) -> StatsResult<()> {
        out.write_byte(HEADER_TOKEN);
        out.write_byte(self.version);
        out.write_i64(self.creation_ms);
        out.write_i64(self.process_id);
        out.write_i64(self.process_start_ms);
        out.write_i32(self.utc_offset_ms);
        out.write_utf(&self.timezone)?;
        out.write_utf(&self.system_directory)?;
        out.write_utf(&self.product_description)?;
        out.write_utf(&self.os_name)?;
        out.write_utf(&self.machine)?;
        Ok(())
    }

    /// Decodes the header body; the leading token has already been consumed.
    pub fn decode_body<R: Read>(input: &mut R) -> StatsResult<Self> {
        let version = input.read_u8()?;
        if version != ARCHIVE_VERSION {
            return Err(StatsError::corruption(format!(
                "unsupported archive version {version}"
            )));
        }
        Ok(Self {
            version,
            creation_ms: input.read_i64::<BigEndian>()?,
            process_id: input.read_i64::<BigEndian>()?,
            process_start_ms: input.read_i64::<BigEndian>()?,
            utc_offset_ms: input.read_i32::<BigEndian>()?,
            timezone: read_utf(input)?,
            system_directory: read_utf(input)?,
            product_description: read_utf(input)?,
            os_name: read_utf(input)?,
            machine: read_utf(input)?,
        })
    }
}

/// `("<sysname> ", "<machine> <nodename>")` from `uname(2)`.
#[cfg(unix)]
fn host_description() -> (String, String) {
    use std::ffi::CStr;

    // SAFETY: utsname is plain old data and uname only writes into it.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut uts) } != 0 {
        return fallback_host_description();
    }
    let field = |chars: &[libc::c_char]| {
        // SAFETY: uname NUL-terminates every field it fills.
        unsafe { CStr::from_ptr(chars.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    };
    (
        format!("{} ", field(&uts.sysname)),
        format!("{} {}", field(&uts.machine), field(&uts.nodename)),
    )
}

#[cfg(not(unix))]
fn host_description() -> (String, String) {
    fallback_host_description()
}

fn fallback_host_description() -> (String, String) {
    (
        format!("{} ", std::env::consts::OS),
        std::env::consts::ARCH.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use byteorder::ReadBytesExt;

    use super::*;

    #[test]
    fn captured_header_decodes() {
        let header = ArchiveHeader::capture(4242, 1_700_000_000_000, "/tmp/client", "bop-stats test");
        assert_eq!(header.version, ARCHIVE_VERSION);
        assert!(header.creation_ms >= header.process_start_ms);
        assert!(!header.os_name.is_empty());

        let mut out = ArchiveBuffer::new();
        header.encode(&mut out).unwrap();
        let bytes = out.take();
        assert_eq!(&bytes[..2], &[HEADER_TOKEN, ARCHIVE_VERSION]);

        let mut cursor = Cursor::new(bytes);
        assert_eq!(cursor.read_u8().unwrap(), HEADER_TOKEN);
        let decoded = ArchiveHeader::decode_body(&mut cursor).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut cursor = Cursor::new(vec![3u8]);
        assert!(matches!(
            ArchiveHeader::decode_body(&mut cursor),
            Err(StatsError::Corruption(_))
        ));
    }
}
