use std::io::Write;

use tempfile::NamedTempFile;

use super::*;

#[test]
fn parses_groups_and_wildcards() {
	let map = PrincipalMap::parse(
		"# system principals\n\
		 root:wheel,ops\n\
		 deploy:*\n\
		 backup:ops,*,dba\n\
		 www:web\n",
	);
	assert_eq!(map.len(), 4);
	assert_eq!(
		map.lookup("root"),
		Some(&GroupAccess::Groups("wheel,ops".to_string()))
	);
	assert_eq!(map.lookup("deploy"), Some(&GroupAccess::Any));
	// A wildcard anywhere in the list wins.
	assert_eq!(map.lookup("backup"), Some(&GroupAccess::Any));
	assert_eq!(map.lookup("www"), Some(&GroupAccess::Groups("web".to_string())));
}

#[test]
fn skips_comments_and_degenerate_lines() {
	let map = PrincipalMap::parse(
		"#root:wheel\n\
		 \n\
		 no-colon-here\n\
		 admin:wheel\n",
	);
	assert_eq!(map.len(), 1);
	assert!(map.lookup("root").is_none());
	assert!(map.lookup("no-colon-here").is_none());
	assert!(map.lookup("admin").is_some());
}

#[test]
fn lookup_is_case_sensitive() {
	let map = PrincipalMap::parse("Root:wheel\n");
	assert!(map.lookup("root").is_none());
	assert!(map.lookup("Root").is_some());
}

#[test]
fn loads_from_file() {
	let mut file = NamedTempFile::new().unwrap();
	writeln!(file, "root:*").unwrap();
	file.flush().unwrap();
	let map = PrincipalMap::load(file.path()).unwrap();
	assert_eq!(map.lookup("root"), Some(&GroupAccess::Any));
}

#[test]
fn missing_file_errors() {
	assert!(PrincipalMap::load(Path::new("/nonexistent/principal_aliases")).is_err());
}
