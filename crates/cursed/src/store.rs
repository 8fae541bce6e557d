use std::path::Path;

use sled::transaction::{
	ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};

/// Tree holding fingerprint -> first-seen unix seconds (decimal ASCII).
const FIRST_SEEN_TREE: &str = "pubkeybirthdays";
/// Tree holding the X.509 serial counter (raw big-endian bytes).
const TLS_SERIAL_TREE: &str = "certserial";
const SERIAL_KEY: &[u8] = b"serial";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("store i/o failure: {0}")]
	Io(#[from] sled::Error),

	#[error("corrupt store value: {0}")]
	Corrupt(String),
}

impl From<TransactionError<String>> for StoreError {
	fn from(e: TransactionError<String>) -> Self {
		match e {
			TransactionError::Abort(msg) => StoreError::Corrupt(msg),
			TransactionError::Storage(e) => StoreError::Io(e),
		}
	}
}

/// Durable counters and the public-key first-seen ledger.
///
/// All mutation runs inside sled transactions: serial increments are atomic
/// read-modify-writes, and first-seen insertion is a compare-and-swap so two
/// racing requests commit exactly one value.
pub struct Store {
	db: sled::Db,
	first_seen: sled::Tree,
	tls_serial: sled::Tree,
}

impl Store {
	pub fn open(path: &Path) -> Result<Self, StoreError> {
		let db = sled::open(path)?;
		let first_seen = db.open_tree(FIRST_SEEN_TREE)?;
		let tls_serial = db.open_tree(TLS_SERIAL_TREE)?;
		Ok(Store {
			db,
			first_seen,
			tls_serial,
		})
	}

	/// When was this fingerprint first presented, if ever?
	pub fn first_seen(&self, fp: &str) -> Result<Option<i64>, StoreError> {
		match self.first_seen.get(fp.as_bytes())? {
			Some(v) => Ok(Some(parse_dec_i64(&v)?)),
			None => Ok(None),
		}
	}

	/// Record `now` as the fingerprint's birthday, unless one is already
	/// recorded. Returns the committed value, which under a race is the
	/// earliest writer's.
	pub fn record_first_seen(&self, fp: &str, now: i64) -> Result<i64, StoreError> {
		match self
			.first_seen
			.compare_and_swap(fp.as_bytes(), None::<&[u8]>, Some(now.to_string().into_bytes()))?
		{
			Ok(()) => Ok(now),
			Err(cas) => match cas.current {
				Some(v) => parse_dec_i64(&v),
				// Deleted between probe and swap; the core never deletes, so
				// treat as corrupt rather than retrying forever.
				None => Err(StoreError::Corrupt(format!("first-seen entry for {fp} vanished"))),
			},
		}
	}

	/// Next SSH certificate serial for the CA identified by `ca_fp`.
	pub fn next_ssh_serial(&self, ca_fp: &[u8]) -> Result<u64, StoreError> {
		let tree = self.db.open_tree(ca_fp)?;
		let serial = tree.transaction(|tx| -> ConflictableTransactionResult<u64, String> {
			let current = match tx.get(SERIAL_KEY)? {
				Some(v) => parse_dec_u64(&v)
					.map_err(|e| ConflictableTransactionError::Abort(e.to_string()))?,
				None => 0,
			};
			let next = current + 1;
			tx.insert(SERIAL_KEY, next.to_string().into_bytes())?;
			Ok(next)
		})?;
		Ok(serial)
	}

	/// Next X.509 serial, as minimal big-endian bytes.
	pub fn next_tls_serial(&self) -> Result<Vec<u8>, StoreError> {
		let serial = self
			.tls_serial
			.transaction(|tx| -> ConflictableTransactionResult<Vec<u8>, String> {
				let current = tx.get(SERIAL_KEY)?.map(|v| v.to_vec()).unwrap_or_default();
				let next = increment_be(&current);
				tx.insert(SERIAL_KEY, next.clone())?;
				Ok(next)
			})?;
		Ok(serial)
	}

	/// Seed the X.509 serial counter; used once when the CA is created with
	/// the fixed serial 1.
	pub fn init_tls_serial(&self, value: u64) -> Result<(), StoreError> {
		self
			.tls_serial
			.insert(SERIAL_KEY, trim_leading_zeros(&value.to_be_bytes()))?;
		Ok(())
	}

	pub fn flush(&self) -> Result<(), StoreError> {
		self.db.flush()?;
		Ok(())
	}
}

fn parse_dec_i64(v: &[u8]) -> Result<i64, StoreError> {
	std::str::from_utf8(v)
		.ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| StoreError::Corrupt(format!("not a decimal timestamp: {v:?}")))
}

fn parse_dec_u64(v: &[u8]) -> Result<u64, StoreError> {
	std::str::from_utf8(v)
		.ok()
		.and_then(|s| s.parse().ok())
		.ok_or_else(|| StoreError::Corrupt(format!("not a decimal serial: {v:?}")))
}

/// Add one to a big-endian byte string, growing on overflow. An empty input
/// is zero, so the first serial issued is 1.
fn increment_be(bytes: &[u8]) -> Vec<u8> {
	let mut out = bytes.to_vec();
	for b in out.iter_mut().rev() {
		if *b == 0xff {
			*b = 0;
		} else {
			*b += 1;
			return out;
		}
	}
	out.insert(0, 1);
	out
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
	let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
	bytes[start..].to_vec()
}

/// Render a big-endian serial for logs: decimal when it fits, hex otherwise.
pub fn serial_display(bytes: &[u8]) -> String {
	if bytes.len() <= 16 {
		let mut v: u128 = 0;
		for &b in bytes {
			v = (v << 8) | b as u128;
		}
		v.to_string()
	} else {
		hex::encode(bytes)
	}
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
