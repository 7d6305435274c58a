#![allow(dead_code)]

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use singlejar::merge::BuildEnvironment;
use singlejar::zip::{parse_central_directory, CentralDirectoryRecord};
use singlejar::{ArchiveWriter, MergeConfig, MergeSummary};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// One member of a fixture archive. Names ending in `/` become directories.
pub struct Member<'a> {
    pub name: &'a str,
    pub data: &'a [u8],
}

pub fn member<'a>(name: &'a str, data: &'a [u8]) -> Member<'a> {
    Member { name, data }
}

/// Scratch directory holding fixtures and outputs of one test.
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn text_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Build an archive with the `zip` crate; file members are deflated
    /// when `deflate` is set.
    pub fn archive(&self, name: &str, members: &[Member<'_>], deflate: bool) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, archive_bytes(members, deflate)).unwrap();
        path
    }

    /// A jar shaped like a compiled library: manifest plus class files.
    pub fn library_jar(&self, name: &str) -> PathBuf {
        self.archive(
            name,
            &[
                member("META-INF/", b""),
                member("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\nCreated-By: javac\r\n\r\n"),
                member("com/", b""),
                member("com/google/", b""),
                member("com/google/test/", b""),
                member("com/google/test/Class1.class", b"\xCA\xFE\xBA\xBEclass one body"),
                member("com/google/test/Class2.class", b"\xCA\xFE\xBA\xBEclass two body, a bit longer"),
                member("com/google/test/data.txt", b"data data data data data data data\n"),
            ],
            true,
        )
    }

    /// A jar with data files under `tools/singlejar/data/`.
    pub fn data_jar(&self, name: &str, second_file: &str) -> PathBuf {
        self.archive(
            name,
            &[
                member("tools/", b""),
                member("tools/singlejar/", b""),
                member("tools/singlejar/data/", b""),
                member(
                    "tools/singlejar/data/extra_file1",
                    b"extra_file_1 line1\nextra_file_1 line2\n",
                ),
                member(second_file, b"extra_file_2 line1\nextra_file_2 line2\n"),
            ],
            false,
        )
    }
}

pub fn archive_bytes(members: &[Member<'_>], deflate: bool) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let method = if deflate {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    };
    let options = SimpleFileOptions::default().compression_method(method);
    for m in members {
        if m.name.ends_with('/') {
            writer.add_directory(m.name, options).unwrap();
        } else {
            writer.start_file(m.name, options).unwrap();
            writer.write_all(m.data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn test_environment() -> BuildEnvironment {
    BuildEnvironment {
        user: "tester".to_string(),
        host: "testhost".to_string(),
    }
}

pub fn config() -> MergeConfig {
    MergeConfig {
        build_target: "//tools/singlejar:test".to_string(),
        environment: test_environment(),
        ..MergeConfig::default()
    }
}

pub async fn merge(config: MergeConfig, output: &Path) -> MergeSummary {
    ArchiveWriter::new(config).write_to_path(output).await.unwrap()
}

/// Entry names in central directory order, read with the `zip` crate.
pub fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn entry_contents(path: &Path, name: &str) -> String {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut file = archive
        .by_name(name)
        .unwrap_or_else(|e| panic!("no entry {name}: {e}"));
    let mut content = String::new();
    file.read_to_string(&mut content).unwrap();
    content
}

/// Directory records as stored, parsed without the `zip` crate.
pub fn records(path: &Path) -> Vec<CentralDirectoryRecord> {
    let bytes = std::fs::read(path).unwrap();
    parse_central_directory(&bytes)
        .unwrap()
        .into_iter()
        .map(|(record, _)| record)
        .collect()
}

pub fn file_names(path: &Path) -> Vec<String> {
    entry_names(path)
        .into_iter()
        .filter(|name| !name.ends_with('/'))
        .collect()
}

pub fn entry_bytes(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut content = Vec::new();
    file.read_to_end(&mut content).unwrap();
    content
}
