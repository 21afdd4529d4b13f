//! Tagged-length-value option codec (spec §4.1).
//!
//! Each option is `opt_type(u16 BE) opt_len(u16 BE) value[opt_len]`. The high
//! bit of `opt_type` is the `mandatory` flag: a receiver that does not
//! recognize the low 15 bits of an option with that bit set must close the
//! session with `unsupported option`; otherwise it skips the option.

use crate::errors::*;

pub const MANDATORY_BIT: u16 = 0x8000;
pub const OPT_TYPE_MASK: u16 = 0x7fff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
	pub opt_type: u16,
	pub mandatory: bool,
	pub value: Vec<u8>,
}

impl RawOption {
	pub fn as_u8(&self) -> Result<u8> {
		self.value.first().copied().ok_or_else(|| "option too short for u8".into())
	}

	pub fn as_u16(&self) -> Result<u16> {
		let b: [u8; 2] = self.value[..].try_into().map_err(|_| "option not 2 bytes")?;
		Ok(u16::from_be_bytes(b))
	}

	pub fn as_u32(&self) -> Result<u32> {
		let b: [u8; 4] = self.value[..].try_into().map_err(|_| "option not 4 bytes")?;
		Ok(u32::from_be_bytes(b))
	}

	pub fn as_u64(&self) -> Result<u64> {
		let b: [u8; 8] = self.value[..].try_into().map_err(|_| "option not 8 bytes")?;
		Ok(u64::from_be_bytes(b))
	}

	pub fn as_bool(&self) -> Result<bool> {
		Ok(self.as_u8()? != 0)
	}

	pub fn as_str(&self) -> Result<&str> {
		std::str::from_utf8(&self.value).map_err(|_| "option not valid utf8".into())
	}
}

pub struct Encoder {
	buf: Vec<u8>,
	count: u16,
}

impl Encoder {
	pub fn new() -> Self {
		Encoder { buf: Vec::new(), count: 0 }
	}

	fn push_raw(&mut self, opt_type: u16, mandatory: bool, value: &[u8]) {
		let tag = if mandatory { opt_type | MANDATORY_BIT } else { opt_type & OPT_TYPE_MASK };
		self.buf.extend_from_slice(&tag.to_be_bytes());
		self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
		self.buf.extend_from_slice(value);
		self.count += 1;
	}

	pub fn push_u8(&mut self, opt_type: u16, mandatory: bool, v: u8) -> &mut Self {
		self.push_raw(opt_type, mandatory, &[v]);
		self
	}

	pub fn push_bool(&mut self, opt_type: u16, mandatory: bool, v: bool) -> &mut Self {
		self.push_u8(opt_type, mandatory, v as u8)
	}

	pub fn push_u16(&mut self, opt_type: u16, mandatory: bool, v: u16) -> &mut Self {
		self.push_raw(opt_type, mandatory, &v.to_be_bytes());
		self
	}

	pub fn push_u32(&mut self, opt_type: u16, mandatory: bool, v: u32) -> &mut Self {
		self.push_raw(opt_type, mandatory, &v.to_be_bytes());
		self
	}

	pub fn push_u64(&mut self, opt_type: u16, mandatory: bool, v: u64) -> &mut Self {
		self.push_raw(opt_type, mandatory, &v.to_be_bytes());
		self
	}

	pub fn push_str(&mut self, opt_type: u16, mandatory: bool, v: &str) -> &mut Self {
		self.push_raw(opt_type, mandatory, v.as_bytes());
		self
	}

	pub fn push_bytes(&mut self, opt_type: u16, mandatory: bool, v: &[u8]) -> &mut Self {
		self.push_raw(opt_type, mandatory, v);
		self
	}

	/// Consumes the encoder, returning the options bytes and the advisory
	/// option count (receivers must not rely on the count; `msg_len` is
	/// authoritative).
	pub fn finish(self) -> (Vec<u8>, u16) {
		(self.buf, self.count)
	}
}

impl Default for Encoder {
	fn default() -> Self {
		Self::new()
	}
}

/// Decodes a flat options buffer into a list of raw options. Fails with
/// `Malformed` if any `opt_len` would overrun the buffer.
pub fn decode_options(buf: &[u8]) -> Result<Vec<RawOption>> {
	let mut out = Vec::new();
	let mut pos = 0usize;

	while pos < buf.len() {
		if pos + 4 > buf.len() {
			return Err(ErrorKind::Malformed("truncated option header".into()).into());
		}
		let tag = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
		let opt_len = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize;
		pos += 4;

		if pos + opt_len > buf.len() {
			return Err(ErrorKind::Malformed("option value overruns message".into()).into());
		}

		out.push(RawOption {
			opt_type: tag & OPT_TYPE_MASK,
			mandatory: tag & MANDATORY_BIT != 0,
			value: buf[pos..pos + opt_len].to_vec(),
		});
		pos += opt_len;
	}

	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_mixed_options() {
		let mut enc = Encoder::new();
		enc.push_u32(1, true, 0xdead_beef);
		enc.push_str(2, false, "cluster-a");
		enc.push_bool(3, true, true);
		let (bytes, count) = enc.finish();
		assert_eq!(count, 3);

		let opts = decode_options(&bytes).unwrap();
		assert_eq!(opts.len(), 3);
		assert_eq!(opts[0].as_u32().unwrap(), 0xdead_beef);
		assert!(opts[0].mandatory);
		assert_eq!(opts[1].as_str().unwrap(), "cluster-a");
		assert!(!opts[1].mandatory);
		assert!(opts[2].as_bool().unwrap());
	}

	#[test]
	fn truncated_option_is_malformed() {
		let mut bytes = vec![0u8; 3];
		bytes[2] = 0xff;
		assert!(decode_options(&bytes).is_err());
	}

	#[test]
	fn overrunning_opt_len_is_malformed() {
		let mut enc = Encoder::new();
		enc.push_u8(1, false, 9);
		let (mut bytes, _) = enc.finish();
		// Corrupt the length prefix to claim more bytes than exist.
		bytes[2] = 0xff;
		bytes[3] = 0xff;
		assert!(decode_options(&bytes).is_err());
	}
}
