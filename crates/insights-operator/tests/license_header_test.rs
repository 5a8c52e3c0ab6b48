// Copyright (C) 2025 Canonical Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Every Rust source carries the project license header.

use std::path::{Path, PathBuf};

const HEADER: [&str; 2] = [
    "// Copyright (C) 2025 Canonical Ltd.",
    "// SPDX-License-Identifier: AGPL-3.0-or-later",
];

fn rust_files(dir: &Path, found: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            rust_files(&path, found);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            found.push(path);
        }
    }
}

#[test]
fn test_sources_carry_license_header() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    rust_files(&root.join("src"), &mut files);
    rust_files(&root.join("tests"), &mut files);
    assert!(files.len() > 20);

    for file in files {
        let content = std::fs::read_to_string(&file).unwrap();
        let head: Vec<&str> = content.lines().take(2).collect();
        assert_eq!(head, HEADER, "{}", file.display());
    }
}
