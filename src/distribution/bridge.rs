//! The Erlang side of the TCP link, shipped as source and compiled by the
//! runtime it is started in.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub const MODULE: &str = "els_bridge";
/// `render_docs(Module, Function, Arity, Format)`.
pub const RENDER_FUNCTION: &str = "render_docs";

const SOURCE: &str = include_str!("../../priv/els_bridge.erl");
const APP_DIR_NAME: &str = "erlang-language-server";

/// `<cache>/erlang-language-server/bridge`, when the platform has a cache dir.
pub fn default_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|cache| cache.join(APP_DIR_NAME).join("bridge"))
}

/// Where this build's bridge source lives under `dir`.
///
/// The directory is keyed by a hash of the source so servers of different
/// versions never compile each other's bridge.
pub fn source_path(dir: &Path) -> PathBuf {
    let hash = blake3::hash(SOURCE.as_bytes()).to_hex();
    dir.join(&hash[..12]).join(format!("{MODULE}.erl"))
}

/// Writes the bridge source to `path` unless it is already there.
pub async fn install(path: &Path) -> io::Result<()> {
    if tokio::fs::read_to_string(path).await.is_ok_and(|found| found == SOURCE) {
        debug!("Bridge source already installed at {}", path.display());
        return Ok(());
    }
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bridge path has no parent"))?;
    tokio::fs::create_dir_all(parent).await?;
    // Concurrent servers may install at once; each renames a whole file.
    let staging = parent.join(format!(".{MODULE}.{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&staging, SOURCE).await?;
    tokio::fs::rename(&staging, path).await?;
    info!("Installed bridge source at {}", path.display());
    Ok(())
}

/// `path` as the body of an Erlang string literal.
pub fn erlang_string(path: &Path) -> String {
    let mut escaped = String::new();
    for c in path.to_string_lossy().chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            c => escaped.push(c),
        }
    }
    escaped
}

/// `-eval` expression that compiles and loads the bridge from `{bridge}`,
/// then listens on `{port}`. A failed compile stops the node.
pub fn start_expression() -> String {
    format!(
        "case compile:file(\"{{bridge}}\", [binary, return_errors]) of \
         {{ok, M, B}} -> {{module, M}} = code:load_binary(M, \"{{bridge}}\", B), \
         {{ok, _}} = {MODULE}:start({{port}}); \
         Error -> io:format(standard_error, \"~p~n\", [Error]), halt(1) end."
    )
}
