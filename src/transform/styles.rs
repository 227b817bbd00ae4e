use anyhow::Context;

use crate::record::FileRecord;
use crate::transform::Transformer;

/// Compiles an SCSS entry point into compressed CSS. Partials (`_*.scss`)
/// should be excluded by the leaf glob, the way the source tree references
/// them through entry points only.
pub struct ScssCompile;

impl Transformer for ScssCompile {
    fn name(&self) -> &str {
        "scss"
    }

    fn params(&self) -> Vec<u8> {
        b"style=compressed".to_vec()
    }

    fn apply(&self, record: FileRecord) -> anyhow::Result<Vec<FileRecord>> {
        let source = std::str::from_utf8(&record.content)
            .with_context(|| format!("'{}' is not valid UTF-8", record.path))?;

        let opts = grass::Options::default().style(grass::OutputStyle::Compressed);
        let css = grass::from_string(source.to_owned(), &opts)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        let path = record.path.with_extension("css");
        let out = record.renamed(path).with_content(css.into_bytes());

        Ok(vec![out])
    }
}
