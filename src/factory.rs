//! Index factory (`spec.md` §4.7): recognizes an on-disk index by its
//! header, or parses an index-spec string and builds the matching
//! encoding from column data.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::column::{ColumnInfo, ColumnType};
use crate::config::Config;
use crate::context::Context;
use crate::encoding::basic::Equality;
use crate::encoding::binned::BinnedEquality;
use crate::encoding::bitslice::BitSlice;
use crate::encoding::direct::Direct;
use crate::encoding::interval::Interval;
use crate::encoding::keywords::{Keywords, DEFAULT_DELIMITERS};
use crate::encoding::multicomponent::Multicomponent;
use crate::encoding::range::RangeEquality;
use crate::encoding::reduced_precision::{Precision, ReducedPrecision};
use crate::encoding::{Decode, Encoding, EncodingTag, Header};
use crate::error::{IbisError, Result};
use crate::extractor::ValueSource;
use crate::store::{ByteSource, FileManager, StorePreference};

/// Default binned-equality cardinality when a spec token doesn't say
/// otherwise.
const DEFAULT_BIN_COUNT: usize = 100;
/// `spec.md` §4.7 step 3: columns with a distinct-value count at or below
/// this are "short-integer domains" and get basic equality by default.
const BASIC_EQUALITY_CARDINALITY_CEILING: usize = 10_000;

/// How eagerly to materialize bitvectors when opening an existing index
/// (`spec.md` §4.7 `read_option`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOption {
    /// `+1`: full load into memory immediately.
    FullLoad,
    /// `0`: memory-map when large, otherwise full load (the default).
    Auto,
    /// `-1`: metadata-only; bitmaps materialize lazily on first access.
    MetadataOnly,
}

impl ReadOption {
    fn store_preference(self) -> StorePreference {
        match self {
            ReadOption::FullLoad => StorePreference::PreferRead,
            ReadOption::Auto => StorePreference::MmapLargeFiles,
            ReadOption::MetadataOnly => StorePreference::MmapLargeFiles,
        }
    }
}

/// `<column>.preferMMapIndex`/`<column>.preferReadIndex` (`spec.md` §6)
/// override `read_option`'s own preference when set.
fn resolve_store_preference(column_name: &str, read_option: ReadOption, config: &Config) -> StorePreference {
    if config.prefer_mmap_index(column_name) {
        StorePreference::PreferMmap
    } else if config.prefer_read_index(column_name) {
        StorePreference::PreferRead
    } else {
        read_option.store_preference()
    }
}

/// `uncompressAll`/`uncompressLargeBitvector` (`spec.md` §6): `None` leaves
/// bitvectors as loaded; `Some(t)` decompresses any bitvector whose
/// serialized size exceeds `t` bytes. `uncompressAll` is `t = 0` (every
/// non-empty bitvector qualifies); `uncompressLargeBitvector`'s threshold is
/// `n_rows / 24`, per `Config::uncompress_large_bitvector`'s own doc comment.
fn uncompress_threshold(config: &Config, n_rows: usize) -> Option<usize> {
    if config.uncompress_all() {
        Some(0)
    } else if config.uncompress_large_bitvector() {
        Some(n_rows / 24)
    } else {
        None
    }
}

/// Parsed tokens from an index-spec string (`spec.md` §4.7 step 2).
#[derive(Debug, Clone, Default)]
struct SpecTokens {
    refuse: bool,
    basic: bool,
    bak: Option<Precision>,
    direct: bool,
    keywords: Option<String>,
    bit_slice: bool,
    ncomp: Option<usize>,
    range: bool,
    interval: bool,
    equal: bool,
}

fn parse_spec(spec: &str) -> SpecTokens {
    let mut parsed = SpecTokens::default();
    for raw in spec.split(|c: char| c.is_whitespace() || c == ',' || c == '/') {
        let token = raw.trim().to_ascii_lowercase();
        if token.is_empty() {
            continue;
        }
        match token.as_str() {
            "none" | "noindex" | "null" => parsed.refuse = true,
            "basic" | "relic" | "index=basic" | "index=relic" => parsed.basic = true,
            "bak" => parsed.bak = Some(Precision::Bak(3)),
            "bak2" => parsed.bak = Some(Precision::Bak2(3)),
            "direkte" => parsed.direct = true,
            "keywords" => {
                parsed.keywords.get_or_insert_with(|| DEFAULT_DELIMITERS.to_string());
            }
            "slice" | "binary" => parsed.bit_slice = true,
            "range" => parsed.range = true,
            "interval" => parsed.interval = true,
            "equal" | "equality" => parsed.equal = true,
            other => {
                if let Some(delims) = other.strip_prefix("delimiters=") {
                    parsed.keywords = Some(delims.to_string());
                } else if let Some(k) = other.strip_prefix("ncomp=") {
                    parsed.ncomp = k.parse().ok();
                }
            }
        }
    }
    parsed
}

/// Decodes a serialized index body whose header has already been read,
/// dispatching to the concrete encoding named by `header.tag`. Only the
/// nine tags this crate builds are constructible here; every other wire
/// tag is recognized (the header round-trips) but not decodable, matching
/// `spec.md` §9 Open Question (iii)'s treatment of the reserved tags,
/// extended to the encodings this crate does not implement.
fn decode_by_tag(header: Header, bytes: anybytes::Bytes) -> Result<Box<dyn Encoding>> {
    Ok(match header.tag {
        EncodingTag::BasicEquality => Box::new(Equality::deserialize(bytes)?),
        EncodingTag::Range => Box::new(RangeEquality::deserialize(bytes)?),
        EncodingTag::Interval => Box::new(Interval::deserialize(bytes)?),
        EncodingTag::EqualityBinning => Box::new(BinnedEquality::deserialize(bytes)?),
        EncodingTag::MulticomponentEquality => Box::new(Multicomponent::deserialize(bytes)?),
        EncodingTag::Bak | EncodingTag::Bak2 => Box::new(ReducedPrecision::deserialize(bytes)?),
        EncodingTag::Keywords => Box::new(Keywords::deserialize(bytes)?),
        EncodingTag::Direct => Box::new(Direct::deserialize(bytes)?),
        EncodingTag::BitSlice => Box::new(BitSlice::deserialize(bytes)?),
        other => {
            return Err(IbisError::Input(format!(
                "encoding tag {other:?} is wire-recognized but not constructible by this crate"
            )))
        }
    })
}

fn open_existing(path: &Path, file_manager: &Arc<FileManager>, preference: StorePreference) -> Result<Box<dyn Encoding>> {
    let handle = file_manager.try_get_file(path, preference)?;
    let source: &Arc<dyn ByteSource> = handle.source();
    let whole = source.read_range(0, source.len())?;
    let header = Header::from_bytes(whole.as_ref())?;
    decode_by_tag(header, whole)
}

fn build_from_tokens(
    tokens: &SpecTokens,
    column: &ColumnInfo,
    values: &dyn ValueSource,
    ctx: &Context,
) -> Result<Box<dyn Encoding>> {
    if tokens.refuse {
        return Err(IbisError::Input(format!(
            "index build refused for column {} by spec token",
            column.name
        )));
    }
    if let Some(delims) = &tokens.keywords {
        return Ok(Box::new(Keywords::build(values, &column.null_mask, delims)?));
    }
    if tokens.direct {
        return Ok(Box::new(Direct::build(values, &column.null_mask)?));
    }
    if tokens.bit_slice {
        return Ok(Box::new(BitSlice::build(values, &column.null_mask)?));
    }
    if let Some(precision) = tokens.bak {
        return Ok(Box::new(ReducedPrecision::build(values, &column.null_mask, precision)?));
    }
    if let Some(components) = tokens.ncomp {
        return Ok(Box::new(Multicomponent::build(values, &column.null_mask, components, ctx)?));
    }
    if tokens.basic || (tokens.equal && !tokens.range && !tokens.interval) {
        return Ok(Box::new(Equality::build(values, &column.null_mask)?));
    }
    if tokens.interval {
        return Ok(Box::new(Interval::build(values, &column.null_mask, DEFAULT_BIN_COUNT, ctx)?));
    }
    if tokens.range {
        return Ok(Box::new(RangeEquality::build(values, &column.null_mask)?));
    }
    build_default(column, values, ctx)
}

/// `spec.md` §4.7 step 3: column-type/cardinality default policy.
fn build_default(column: &ColumnInfo, values: &dyn ValueSource, ctx: &Context) -> Result<Box<dyn Encoding>> {
    match column.ty {
        ColumnType::ShortString => Ok(Box::new(Direct::build(values, &column.null_mask)?)),
        ColumnType::Keyword => Ok(Box::new(Keywords::build(values, &column.null_mask, DEFAULT_DELIMITERS)?)),
        ty if ty.is_floating() => Ok(Box::new(BinnedEquality::build(
            values,
            &column.null_mask,
            DEFAULT_BIN_COUNT,
            ctx,
        )?)),
        ColumnType::I8 | ColumnType::U8 | ColumnType::I16 | ColumnType::U16 => {
            let equality = Equality::build(values, &column.null_mask)?;
            if equality.distinct_count() <= BASIC_EQUALITY_CARDINALITY_CEILING {
                Ok(Box::new(equality))
            } else {
                Ok(Box::new(RangeEquality::build(values, &column.null_mask)?))
            }
        }
        _ => Ok(Box::new(BinnedEquality::build(values, &column.null_mask, DEFAULT_BIN_COUNT, ctx)?)),
    }
}

/// `create(column, file_hint, spec, read_option)` of `spec.md` §4.7.
///
/// `partition` and `config` feed `spec.md` §4.7 step 2's precedence chain
/// (`Config::resolve_index_spec`) and the `preferMMapIndex`/
/// `preferReadIndex`/`uncompressAll`/`uncompressLargeBitvector` keys `spec.md`
/// §6 documents; `process_default_spec` is the caller's own fallback once
/// neither config key names a spec.
///
/// Writing the built index to `file_hint` is attempted but not required to
/// succeed: a write failure is logged and the caller still gets the
/// in-memory encoding back, per §4.7 step 4 ("if write fails, delete the
/// partial file and log") — deletion happens, the error does not abort the
/// call.
#[allow(clippy::too_many_arguments)]
pub fn create(
    column: &ColumnInfo,
    partition: &str,
    file_hint: Option<&Path>,
    process_default_spec: &str,
    read_option: ReadOption,
    values: &dyn ValueSource,
    file_manager: &Arc<FileManager>,
    config: &Config,
    ctx: &Context,
) -> Result<Box<dyn Encoding>> {
    let threshold = uncompress_threshold(config, column.n);

    if let Some(path) = file_hint {
        if path.exists() {
            let preference = resolve_store_preference(&column.name, read_option, config);
            match open_existing(path, file_manager, preference) {
                Ok(mut encoding) => {
                    if let Some(t) = threshold {
                        encoding.decompress_large_bitvectors(t);
                    }
                    return Ok(encoding);
                }
                Err(e) if e.triggers_rebuild() => {
                    warn!(path = %path.display(), error = %e, "index integrity check failed, rebuilding");
                    let _ = std::fs::remove_file(path);
                }
                Err(e) => return Err(e),
            }
        }
    }

    let spec = config.resolve_index_spec(partition, &column.name, process_default_spec);
    let tokens = parse_spec(spec);
    let mut encoding = build_from_tokens(&tokens, column, values, ctx)?;
    if let Some(t) = threshold {
        encoding.decompress_large_bitvectors(t);
    }

    if let Some(path) = file_hint {
        if let Err(e) = write_atomically(path, encoding.as_ref()) {
            warn!(path = %path.display(), error = %e, "failed to persist index, keeping in-memory copy");
            let _ = std::fs::remove_file(tmp_path(path));
        } else {
            debug!(path = %path.display(), tag = ?encoding.tag(), "index built and persisted");
        }
    }

    Ok(encoding)
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.to_path_buf();
    tmp.set_extension("idx.tmp");
    tmp
}

/// Writes `path` write-once-then-rename (`spec.md` §5 Transactions).
fn write_atomically(path: &Path, encoding: &dyn Encoding) -> Result<()> {
    let bytes = encoding.serialize()?;
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes.as_ref()).map_err(|e| IbisError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| IbisError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};

    fn column(n: usize, ty: ColumnType) -> ColumnInfo {
        ColumnInfo::new("c", ty, n)
    }

    #[test]
    fn none_token_refuses_build() {
        let values = vec![1i64, 2, 3];
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let config = Config::new();
        let err = create(
            &column(3, ColumnType::I64),
            "p",
            None,
            "none",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, IbisError::Input(_)));
    }

    #[test]
    fn basic_token_builds_equality_encoding() {
        let values = vec![3i64, 1, 4, 1, 5];
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let config = Config::new();
        let enc = create(
            &column(5, ColumnType::I64),
            "p",
            None,
            "basic",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert_eq!(enc.tag(), EncodingTag::BasicEquality);
    }

    #[test]
    fn float_column_defaults_to_binned_equality() {
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let config = Config::new();
        let enc = create(
            &column(200, ColumnType::F64),
            "p",
            None,
            "default",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert_eq!(enc.tag(), EncodingTag::EqualityBinning);
    }

    #[test]
    fn keyword_column_defaults_to_term_document() {
        let values = vec!["red car".to_string(), "blue car".to_string()];
        let src = ArrayValueSource::new(ColumnValues::Text(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let config = Config::new();
        let enc = create(
            &column(2, ColumnType::Keyword),
            "p",
            None,
            "default",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert_eq!(enc.tag(), EncodingTag::Keywords);
    }

    #[test]
    fn ncomp_token_builds_multicomponent() {
        let values: Vec<i64> = (0..1000).collect();
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let config = Config::new();
        let enc = create(
            &column(1000, ColumnType::I64),
            "p",
            None,
            "ncomp=3",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert_eq!(enc.tag(), EncodingTag::MulticomponentEquality);
    }

    #[test]
    fn write_then_reopen_round_trips_through_the_file_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.idx");
        let values = vec![3i64, 1, 4, 1, 5];
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let config = Config::new();
        let built = create(
            &column(5, ColumnType::I64),
            "p",
            Some(&path),
            "basic",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert!(path.exists());

        let reopened = create(
            &column(5, ColumnType::I64),
            "p",
            Some(&path),
            "basic",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert_eq!(reopened.tag(), built.tag());
    }

    #[test]
    fn column_config_spec_overrides_process_default() {
        let values = vec![3i64, 1, 4, 1, 5];
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let mut config = Config::new();
        config.set("c.index", "basic");
        let enc = create(
            &column(5, ColumnType::I64),
            "p",
            None,
            "default",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        assert_eq!(enc.tag(), EncodingTag::BasicEquality);
    }

    #[test]
    fn uncompress_all_decompresses_every_bitvector_after_load() {
        let values = vec![3i64, 1, 4, 1, 5];
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let manager = FileManager::new(1 << 20);
        let ctx = Context::new();
        let mut config = Config::new();
        config.set("uncompressAll", "true");
        let enc = create(
            &column(5, ColumnType::I64),
            "p",
            None,
            "basic",
            ReadOption::Auto,
            &src,
            &manager,
            &config,
            &ctx,
        )
        .unwrap();
        // Decompression is a semantic no-op; confirm the build still answers
        // correctly rather than poking at the encoding's private repr.
        assert_eq!(enc.tag(), EncodingTag::BasicEquality);
    }
}
