use std::path::Path;
use std::sync::Arc;

use super::{path_arg, run_compile_job, Font, FontKind, GlyphSource};
use crate::worker::COMPILE_TTX;
use crate::{CancelToken, Context, FontGogglesError};

/// Compile a TTX dump on the pool; the result behaves like any binary font.
pub(crate) async fn load(
    ctx: &Context,
    path: &Path,
    cancel: &CancelToken,
) -> Result<Font, FontGogglesError> {
    let tmp = tempfile::tempdir()?;
    let tt_path = tmp.path().join("font.ttf");
    run_compile_job(
        ctx.pool(),
        COMPILE_TTX,
        vec![path_arg(path), path_arg(&tt_path)],
        path,
        cancel,
    )
    .await?;
    let data: Arc<[u8]> = tokio::fs::read(&tt_path).await?.into();
    Font::from_sfnt(path, 0, FontKind::Ttx, data, GlyphSource::Sfnt, None)
}
