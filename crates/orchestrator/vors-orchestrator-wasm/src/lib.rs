use serde::Serialize;
use serde_wasm_bindgen as swb;
use wasm_bindgen::prelude::*;

use vors_orchestrator::{
    BufferKind, CameraModel, GrowableBuffer, ImagePoint, KeyframeId, OrchestratorError, Session,
    SessionConfig, Tracker,
};

mod js_tracker;

pub use js_tracker::JsTracker;

#[wasm_bindgen]
pub struct VorsSession {
    core: Session<JsTracker>,
}

fn jsvalue_is_undefined_or_null(v: &JsValue) -> bool {
    v.is_undefined() || v.is_null()
}

fn js_err(err: OrchestratorError) -> JsError {
    JsError::new(&format!("{}: {err}", err.category()))
}

fn to_js<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<JsValue, JsError> {
    swb::to_value(value).map_err(|e| JsError::new(&format!("{what} serialization error: {e}")))
}

/// Three `(u, v)` pairs from a flat `[u0, v0, u1, v1, u2, v2]` array.
fn image_points(flat: &[f32], what: &str) -> Result<[ImagePoint; 3], JsError> {
    match flat {
        [u0, v0, u1, v1, u2, v2] => Ok([(*u0, *v0), (*u1, *v1), (*u2, *v2)]),
        _ => Err(JsError::new(&format!(
            "{what}: expected 6 coordinates, got {}",
            flat.len()
        ))),
    }
}

#[wasm_bindgen]
impl VorsSession {
    /// Create a session. Pass a JSON config object or undefined/null for defaults.
    /// Example:
    ///   new VorsSession({ nb_particles: 500000, camera_path_nb_frames: 4000 })
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<VorsSession, JsError> {
        #[cfg(feature = "console_error")]
        console_error_panic_hook::set_once();

        let cfg: SessionConfig = if jsvalue_is_undefined_or_null(&config) {
            SessionConfig::default()
        } else {
            swb::from_value(config).map_err(|e| JsError::new(&format!("config error: {e}")))?
        };
        Ok(VorsSession {
            core: Session::new(cfg).map_err(js_err)?,
        })
    }

    /// Initialize `tracker` (a JS object, see `JsTracker`) with camera `fr1`, `fr2`, `fr3` or `icl`
    /// and track the first frame. Returns the number of frames.
    #[wasm_bindgen(js_name = load_dataset)]
    pub fn load_dataset(&mut self, tracker: JsValue, camera_id: &str) -> Result<usize, JsError> {
        let camera: CameraModel = camera_id.parse().map_err(js_err)?;
        let tracker = JsTracker::new(tracker).map_err(|e| JsError::new(&e.to_string()))?;
        self.core.load_dataset(tracker, camera).map_err(js_err)
    }

    /// Track the next frame. Returns `{ frame, more_frames, new_keyframe, pose }`.
    #[wasm_bindgen]
    pub fn track(&mut self, force_keyframe: bool) -> Result<JsValue, JsError> {
        let outcome = self.core.track(force_keyframe).map_err(js_err)?;
        to_js(&outcome, "track outcome")
    }

    /// Pose of the last tracked frame as a TUM trajectory line.
    #[wasm_bindgen(js_name = pose_line)]
    pub fn pose_line(&self) -> Option<String> {
        self.core
            .tracker()
            .map(|tracker| tracker.current_pose().to_string())
    }

    #[wasm_bindgen(js_name = restart_from)]
    pub fn restart_from(&mut self, base_kf: usize, target_kf: usize) -> Result<JsValue, JsError> {
        let outcome = self
            .core
            .restart_from(KeyframeId(base_kf), KeyframeId(target_kf))
            .map_err(js_err)?;
        to_js(&outcome, "restart outcome")
    }

    /// Visualize relocalization candidates. Points are flat `[u0, v0, u1, v1, u2, v2]` arrays.
    /// Returns the probabilities (index 0 keeps the current pose).
    #[wasm_bindgen(js_name = p3p_visualize)]
    pub fn p3p_visualize(
        &mut self,
        base_kf: usize,
        restart_kf: usize,
        ref_points: &[f32],
        key_points: &[f32],
    ) -> Result<Vec<f64>, JsError> {
        let ref_points = image_points(ref_points, "ref_points")?;
        let key_points = image_points(key_points, "key_points")?;
        self.core
            .p3p_visualize(
                KeyframeId(base_kf),
                KeyframeId(restart_kf),
                &ref_points,
                &key_points,
            )
            .map_err(js_err)
    }

    #[wasm_bindgen(js_name = choose_p3p_initial)]
    pub fn choose_p3p_initial(&mut self, candidate: usize, base_kf: usize) -> Result<JsValue, JsError> {
        let outcome = self
            .core
            .choose_p3p_initial(candidate, KeyframeId(base_kf))
            .map_err(js_err)?;
        to_js(&outcome, "commit outcome")
    }

    /// Live candidate slots: `[{ slot, section: { start, end }, probability } | null; 4]`.
    #[wasm_bindgen]
    pub fn candidates(&self) -> Result<JsValue, JsError> {
        match self.core.candidates() {
            Some(candidates) => to_js(candidates.slots(), "candidates"),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen(js_name = export_camera_poses)]
    pub fn export_camera_poses(&mut self) -> Result<JsValue, JsError> {
        let records = self.core.export_camera_poses().map_err(js_err)?;
        to_js(&records, "camera poses")
    }

    #[wasm_bindgen(js_name = camera_path_dump)]
    pub fn camera_path_dump(&mut self) -> Result<String, JsError> {
        self.core.camera_path_dump().map_err(js_err)
    }

    /// Drain render events (`rebind`, `dirty`, `extent`, `candidate`) in emission order.
    #[wasm_bindgen(js_name = take_render_events)]
    pub fn take_render_events(&mut self) -> Result<JsValue, JsError> {
        to_js(&self.core.take_render_events(), "render events")
    }

    #[wasm_bindgen]
    pub fn stats(&self) -> Result<JsValue, JsError> {
        to_js(&self.core.stats(), "stats")
    }

    #[wasm_bindgen]
    pub fn state(&self) -> Result<JsValue, JsError> {
        to_js(&self.core.state(), "state")
    }

    /// Base address of the point buffer in wasm memory. Re-read after a `rebind` event.
    #[wasm_bindgen]
    pub fn points(&self) -> *const f32 {
        self.buffer(BufferKind::Points)
            .map_or(std::ptr::null(), GrowableBuffer::as_ptr)
    }

    /// Valid scalars in the point buffer.
    #[wasm_bindgen(js_name = points_len)]
    pub fn points_len(&self) -> usize {
        self.buffer(BufferKind::Points).map_or(0, GrowableBuffer::end)
    }

    #[wasm_bindgen]
    pub fn poses(&self) -> *const f32 {
        self.buffer(BufferKind::Poses)
            .map_or(std::ptr::null(), GrowableBuffer::as_ptr)
    }

    #[wasm_bindgen(js_name = poses_len)]
    pub fn poses_len(&self) -> usize {
        self.buffer(BufferKind::Poses).map_or(0, GrowableBuffer::end)
    }

    /// Generation of a buffer (`"points"` or `"poses"`); views taken under another generation are stale.
    #[wasm_bindgen]
    pub fn generation(&self, buffer: JsValue) -> Result<f64, JsError> {
        let kind: BufferKind =
            swb::from_value(buffer).map_err(|e| JsError::new(&format!("buffer kind: {e}")))?;
        Ok(self
            .buffer(kind)
            .map_or(0.0, |buffer| buffer.generation().0 as f64))
    }

    /// Drop the dataset and the JS tracker.
    #[wasm_bindgen]
    pub fn close(&mut self) {
        self.core.close();
    }
}

impl VorsSession {
    fn buffer(&self, kind: BufferKind) -> Option<&GrowableBuffer> {
        let timeline = self.core.timeline()?;
        Some(match kind {
            BufferKind::Points => timeline.points().buffer(),
            BufferKind::Poses => timeline.camera_path().buffer(),
        })
    }
}

/// Numeric ABI version for compatibility checks at init.
#[wasm_bindgen]
pub fn abi_version() -> u32 {
    1
}

