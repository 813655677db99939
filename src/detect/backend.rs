use anyhow::Result;

use crate::detect::result::RawBoxes;

/// Model runtime seam.
///
/// A backend turns an RGB8 frame into raw per-box output. Everything after
/// that (label lookup, box derivation, class filtering) belongs to the
/// adapter, so backends stay small and replaceable.
///
/// # Thread safety
///
/// `detect` takes `&mut self`; backends are not assumed to be re-entrant.
/// Shared backends are wrapped in `Arc<Mutex<_>>` by `BackendRegistry` and
/// every inference call holds that lock.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on a frame.
    ///
    /// Returns `Ok(None)` when the runtime reports no box data at all and
    /// `Ok(Some(empty))` when it reports zero boxes. Both mean "nothing
    /// found", which is not an error.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Option<RawBoxes>>;

    /// Optional warm-up hook, run once before serving.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
