use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use zip::ZipArchive;

use crate::textutil;

/// An EPUB container loaded fully into memory.
///
/// Entries keep the order of the zip central directory; names are stored
/// exactly as the archive spells them.
pub struct EpubPackage {
    entries: Vec<(String, Vec<u8>)>,
}

impl EpubPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open epub {}", path.display()))?;
        let mut zip = ZipArchive::new(file)
            .with_context(|| format!("read epub archive {}", path.display()))?;

        let mut entries: Vec<(String, Vec<u8>)> = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).with_context(|| format!("zip entry #{i}"))?;
            if entry.is_dir() {
                continue;
            }
            let name = entry.name().to_string();
            let mut data: Vec<u8> = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .with_context(|| format!("read zip entry {name}"))?;
            entries.push((name, data));
        }

        Ok(Self { entries })
    }

    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    /// Decoded text of an entry. Missing entries are an error here because
    /// every caller asks for files the package metadata promised.
    pub fn text(&self, name: &str) -> anyhow::Result<String> {
        let bytes = self
            .bytes(name)
            .with_context(|| format!("epub entry {name} is missing"))?;
        textutil::decode_bytes(bytes).with_context(|| format!("decode epub entry {name}"))
    }
}
