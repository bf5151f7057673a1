//! Ignore patterns
//!
//! Glob patterns are translated to regular expressions segment by segment:
//! `**` matches any sequence including `/`, `*` matches any sequence within a
//! segment. A leading `/` anchors the pattern to the start of the tested path;
//! every pattern is anchored to the end. All other characters match literally.
//!
//! Compiled patterns are cached for the lifetime of the process.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

fn cache() -> &'static Mutex<HashMap<String, Arc<Regex>>> {
	static CACHE: OnceLock<Mutex<HashMap<String, Arc<Regex>>>> = OnceLock::new();
	CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Translate a glob into regex source
pub fn to_regex_source(glob: &str) -> String {
	let mut source = String::new();
	let body = match glob.strip_prefix('/') {
		Some(rest) => {
			source.push('^');
			rest
		}
		None => glob,
	};

	let parts: Vec<String> = body.split('/').map(translate_segment).collect();
	source.push_str(&parts.join("/"));
	source.push('$');
	source
}

fn translate_segment(segment: &str) -> String {
	segment
		.split("**")
		.map(|piece| piece.split('*').map(|lit| regex::escape(lit)).collect::<Vec<_>>().join("[^/]*"))
		.collect::<Vec<_>>()
		.join(".*")
}

/// Compile (or fetch from cache) the matcher for one glob
pub fn compile(glob: &str) -> Result<Arc<Regex>, regex::Error> {
	let mut cache = cache().lock().unwrap_or_else(|e| e.into_inner());
	if let Some(re) = cache.get(glob) {
		return Ok(Arc::clone(re));
	}

	let re = Arc::new(Regex::new(&to_regex_source(glob))?);
	cache.insert(glob.to_string(), Arc::clone(&re));
	Ok(re)
}

/// Check that every pattern compiles
pub fn validate(globs: &[String]) -> Result<(), regex::Error> {
	for glob in globs {
		compile(glob)?;
	}
	Ok(())
}

/// True if `path` matches any of `globs`
pub fn matches(path: &str, globs: &[String]) -> bool {
	globs.iter().any(|glob| match compile(glob) {
		Ok(re) => re.is_match(path),
		Err(e) => {
			tracing::warn!("Skipping ignore pattern {:?}: {}", glob, e);
			false
		}
	})
}


// vim: ts=4
