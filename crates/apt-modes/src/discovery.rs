//! Mode Discovery: a one-shot filesystem walk at startup that enumerates
//! installed modes and classifies them.

use std::fs;
use std::path::{Path, PathBuf};

use apt_core::LangCode;

/// A discovered translation pair: the mode file and its canonicalized
/// source/target codes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPair {
    pub mode_path: PathBuf,
    pub src: LangCode,
    pub tgt: LangCode,
}

/// A discovered analyzer, generator, or tagger mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredMode {
    pub mode_path: PathBuf,
    pub name: String,
    pub lang: LangCode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Inventory {
    pub pairs: Vec<DiscoveredPair>,
    pub analyzers: Vec<DiscoveredMode>,
    pub generators: Vec<DiscoveredMode>,
    pub taggers: Vec<DiscoveredMode>,
}

/// Walk `pairs_root` (and, if given, `nonpairs_root`) and build the full
/// inventory. Duplicates (same mode name seen twice) keep the first
/// occurrence, matching the reference loader's `cleanPairs`-adjacent
/// behavior of never overwriting an already-registered mode.
pub fn discover(pairs_root: &Path, nonpairs_root: Option<&Path>) -> std::io::Result<Inventory> {
    let mut inventory = Inventory::default();

    for entry in walk_mode_files(pairs_root)? {
        if let Some(pair) = classify_pair(&entry) {
            if !inventory.pairs.iter().any(|p| p.mode_path == pair.mode_path) {
                inventory.pairs.push(pair);
            }
        }
    }

    if let Some(root) = nonpairs_root {
        for entry in walk_mode_files(root)? {
            // A pair-shaped file under the non-pairs root is not admitted:
            // only genuinely non-pair modes belong here.
            if classify_pair(&entry).is_some() {
                continue;
            }
            if let Some(mode) = classify_nonpair(&entry, root) {
                let bucket = match mode.kind {
                    NonPairKind::Analyzer => &mut inventory.analyzers,
                    NonPairKind::Generator => &mut inventory.generators,
                    NonPairKind::Tagger => &mut inventory.taggers,
                };
                if !bucket.iter().any(|m| m.mode_path == mode.mode.mode_path) {
                    bucket.push(mode.mode);
                }
            }
        }
    }

    Ok(inventory)
}

fn walk_mode_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk_inner(root, &mut out)?;
    Ok(out)
}

fn walk_inner(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_inner(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("mode") {
            out.push(path);
        }
    }
    Ok(())
}

/// A pair mode file is named `src-tgt.mode` with two 3-letter codes.
fn classify_pair(path: &Path) -> Option<DiscoveredPair> {
    let stem = path.file_stem()?.to_str()?;
    let (src, tgt) = stem.split_once('-')?;
    let src = LangCode::parse(src)?;
    let tgt = LangCode::parse(tgt)?;
    Some(DiscoveredPair {
        mode_path: path.to_path_buf(),
        src,
        tgt,
    })
}

enum NonPairKind {
    Analyzer,
    Generator,
    Tagger,
}

struct Classified {
    kind: NonPairKind,
    mode: DiscoveredMode,
}

/// Non-pair modes are classified by the name of the subdirectory they sit
/// directly under, mirroring the `analyzers/`, `generators/`, and
/// `taggers/` (or `disambiguators/`) layout of an installed mode tree.
fn classify_nonpair(path: &Path, root: &Path) -> Option<Classified> {
    let rel = path.strip_prefix(root).ok()?;
    let top = rel.components().next()?.as_os_str().to_str()?;
    let kind = match top {
        "analyzers" | "analysers" => NonPairKind::Analyzer,
        "generators" => NonPairKind::Generator,
        "taggers" | "disambiguators" => NonPairKind::Tagger,
        _ => return None,
    };
    let stem = path.file_stem()?.to_str()?;
    let (name, lang_raw) = stem.rsplit_once('-').unwrap_or((stem, stem));
    let lang = LangCode::parse(lang_raw).or_else(|| LangCode::parse(name))?;
    Some(Classified {
        kind,
        mode: DiscoveredMode {
            mode_path: path.to_path_buf(),
            name: name.to_string(),
            lang,
        },
    })
}
