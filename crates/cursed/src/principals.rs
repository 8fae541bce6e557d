use std::collections::HashMap;
use std::path::Path;

/// What a principal entry permits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupAccess {
	/// Wildcard entry; any caller may request this principal.
	Any,
	/// Comma-separated group list handed to the group verifier.
	Groups(String),
}

/// Principal-to-group alias table, loaded once at startup.
///
/// Lookups are case-sensitive; there is no reload.
#[derive(Debug, Default)]
pub struct PrincipalMap {
	map: HashMap<String, GroupAccess>,
}

impl PrincipalMap {
	pub fn load(path: &Path) -> std::io::Result<Self> {
		let contents = fs_err::read_to_string(path)?;
		Ok(Self::parse(&contents))
	}

	/// Parse the alias file format: `principal:g1,g2,...` per line, `#` at
	/// column 0 comments, lines without a colon skipped. A `*` anywhere in
	/// the group list collapses the entry to a wildcard.
	pub fn parse(contents: &str) -> Self {
		let mut map = HashMap::new();
		for line in contents.lines() {
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			let Some((principal, groups)) = line.split_once(':') else {
				continue;
			};
			let access = if groups.split(',').any(|g| g == "*") {
				GroupAccess::Any
			} else {
				GroupAccess::Groups(groups.to_string())
			};
			map.insert(principal.to_string(), access);
		}
		PrincipalMap { map }
	}

	pub fn lookup(&self, principal: &str) -> Option<&GroupAccess> {
		self.map.get(principal)
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}
}

#[cfg(test)]
#[path = "principals_tests.rs"]
mod tests;
