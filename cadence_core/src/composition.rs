// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame client/device composition strategy.
//!
//! A [`DisplayOutput`] holds the layers visible on one display for the
//! current frame. [`DisplayOutput::choose_strategy`] asks the hardware
//! composer which layers it can composite itself, applies the changes and
//! requests it reports, and records whether the GPU (client) and the
//! hardware (device) each compose anything this frame.
//!
//! Hardware failures never abort a frame: a failed query falls back to
//! client-only composition.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::display::{DisplayContext, DisplayId};
use crate::trace::{CompositionEvent, Tracer};
use crate::vsync::FenceTime;

/// Hardware handle of a layer on one display.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HwcLayerId(pub u64);

impl fmt::Debug for HwcLayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HwcLayerId({})", self.0)
    }
}

/// How a layer is composited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Composition {
    /// Not yet decided.
    #[default]
    Invalid,
    /// Rendered by the GPU into the client target.
    Client,
    /// Composited by the hardware.
    Device,
    /// Filled with a solid color by the hardware.
    SolidColor,
    /// Hardware cursor plane.
    Cursor,
    /// Stream fed to the hardware out of band.
    Sideband,
}

/// Display-level requests bit set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct DisplayRequests(pub u32);

impl DisplayRequests {
    /// The client target should be flipped even if nothing was drawn.
    pub const FLIP_CLIENT_TARGET: Self = Self(1 << 0);
    /// The client target should be written to the output buffer.
    pub const WRITE_CLIENT_TARGET_TO_OUTPUT: Self = Self(1 << 1);

    /// Returns `true` if every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Per-layer hardware request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerRequest {
    /// Clear the layer's area of the client target before GPU composition.
    ClearClientTarget,
}

/// Optional display capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayCapability {
    /// The hardware applies the color transform to client output itself.
    SkipClientColorTransform,
}

/// Changes the hardware reports after validating a frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCompositionChanges {
    /// Layers whose composition type the hardware overrode.
    pub changed_types: Vec<(HwcLayerId, Composition)>,
    /// Display-level requests.
    pub display_requests: DisplayRequests,
    /// Per-layer requests.
    pub layer_requests: Vec<(HwcLayerId, LayerRequest)>,
}

/// Status code of a failed hardware composer call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HwcError(pub i32);

impl fmt::Display for HwcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hardware composer call failed with status {}", self.0)
    }
}

impl core::error::Error for HwcError {}

/// The hardware composer, seen from one frame's composition.
///
/// Implemented by display HAL glue; tests use scripted doubles.
pub trait HwComposer {
    /// Validates the display's layer stack and returns any changes the
    /// hardware wants. `any_client` tells the hardware whether the GPU will
    /// composite at least one layer.
    fn device_composition_changes(
        &mut self,
        display: DisplayId,
        any_client: bool,
    ) -> Result<Option<DeviceCompositionChanges>, HwcError>;

    /// Returns `true` if the display supports `capability`.
    fn has_display_capability(&self, display: DisplayId, capability: DisplayCapability) -> bool;

    /// Presents the validated frame.
    fn present_and_get_release_fences(&mut self, display: DisplayId) -> Result<(), HwcError>;

    /// Returns the present fence of the last presented frame.
    fn present_fence(&self, display: DisplayId) -> FenceTime;

    /// Returns the release fence of `layer` from the last present.
    fn layer_release_fence(&self, display: DisplayId, layer: HwcLayerId) -> FenceTime;

    /// Drops the fences retained from the last present.
    fn clear_release_fences(&mut self, display: DisplayId);
}

/// Composition state of one layer on one display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLayer {
    name: String,
    hwc_layer: Option<HwcLayerId>,
    composition: Composition,
    clear_client_target: bool,
}

impl OutputLayer {
    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hardware layer handle, if the hardware knows this layer.
    #[must_use]
    pub const fn hwc_layer(&self) -> Option<HwcLayerId> {
        self.hwc_layer
    }

    /// Current composition type.
    #[must_use]
    pub const fn composition(&self) -> Composition {
        self.composition
    }

    /// Whether the layer's area of the client target is cleared first.
    #[must_use]
    pub const fn clear_client_target(&self) -> bool {
        self.clear_client_target
    }

    /// Layers unknown to the hardware always go through the GPU.
    #[must_use]
    pub fn requires_client_composition(&self) -> bool {
        self.hwc_layer.is_none() || self.composition == Composition::Client
    }

    /// Sets the requested composition type for the next validation.
    pub fn set_composition(&mut self, composition: Composition) {
        self.composition = composition;
    }
}

/// Frame-level result of [`DisplayOutput::choose_strategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositionState {
    /// The GPU composes at least one layer.
    pub uses_client: bool,
    /// The hardware composes at least one layer.
    pub uses_device: bool,
    /// The hardware asked for the client target to be flipped.
    pub flip_client_target: bool,
}

impl Default for CompositionState {
    /// Client composition only.
    fn default() -> Self {
        Self {
            uses_client: true,
            uses_device: false,
            flip_client_target: false,
        }
    }
}

/// Fences returned by a present.
#[derive(Clone, Debug)]
pub struct FrameFences {
    /// Signals when the frame reaches the screen.
    pub present: FenceTime,
    /// Release fences of hardware layers.
    pub layers: Vec<(HwcLayerId, FenceTime)>,
}

/// One display's layer stack for the current frame.
#[derive(Clone, Debug)]
pub struct DisplayOutput {
    display: DisplayContext,
    layers: Vec<OutputLayer>,
    state: CompositionState,
}

impl DisplayOutput {
    /// Creates an empty output for `display`.
    #[must_use]
    pub fn new(display: DisplayContext) -> Self {
        Self {
            display,
            layers: Vec::new(),
            state: CompositionState::default(),
        }
    }

    /// The display this output targets.
    #[must_use]
    pub const fn display(&self) -> &DisplayContext {
        &self.display
    }

    /// Appends a layer in z-order and returns its index.
    pub fn push_layer(
        &mut self,
        name: impl Into<String>,
        hwc_layer: Option<HwcLayerId>,
        composition: Composition,
    ) -> usize {
        self.layers.push(OutputLayer {
            name: name.into(),
            hwc_layer,
            composition,
            clear_client_target: false,
        });
        self.layers.len() - 1
    }

    /// Layers in z-order.
    #[must_use]
    pub fn layers(&self) -> &[OutputLayer] {
        &self.layers
    }

    /// Mutable access to one layer.
    pub fn layer_mut(&mut self, index: usize) -> Option<&mut OutputLayer> {
        self.layers.get_mut(index)
    }

    /// Result of the last strategy choice.
    #[must_use]
    pub const fn state(&self) -> CompositionState {
        self.state
    }

    /// Returns `true` if any layer requires GPU composition.
    #[must_use]
    pub fn any_layers_require_client(&self) -> bool {
        self.layers.iter().any(OutputLayer::requires_client_composition)
    }

    /// Returns `true` if every layer requires GPU composition.
    #[must_use]
    pub fn all_layers_require_client(&self) -> bool {
        self.layers.iter().all(OutputLayer::requires_client_composition)
    }

    /// Decides client and device composition for this frame.
    ///
    /// Mutates per-layer composition state. Call once per frame, after the
    /// layer stack is final.
    pub fn choose_strategy(&mut self, hwc: &mut dyn HwComposer) -> CompositionState {
        self.choose_strategy_traced(hwc, &mut Tracer::none())
    }

    /// Like [`choose_strategy`](Self::choose_strategy), emitting a
    /// [`CompositionEvent`] to `tracer`.
    pub fn choose_strategy_traced(
        &mut self,
        hwc: &mut dyn HwComposer,
        tracer: &mut Tracer<'_>,
    ) -> CompositionState {
        self.state = CompositionState::default();
        let Some(id) = self.display.hwc_id else {
            self.emit(tracer, None);
            return self.state;
        };

        let changes = match hwc.device_composition_changes(id, self.any_layers_require_client()) {
            Ok(changes) => changes,
            Err(err) => {
                tracing::error!(
                    display = %id,
                    status = err.0,
                    "device composition query failed, using client composition",
                );
                self.emit(tracer, Some(err));
                return self.state;
            }
        };
        if let Some(changes) = changes {
            self.apply_changed_types(&changes.changed_types);
            self.apply_display_requests(changes.display_requests);
            self.apply_layer_requests(&changes.layer_requests);
        }

        self.state.uses_client = self.any_layers_require_client();
        self.state.uses_device = !self.all_layers_require_client();
        self.emit(tracer, None);
        self.state
    }

    /// Applies hardware composition-type overrides. Unknown hardware layers
    /// are ignored.
    pub fn apply_changed_types(&mut self, changed: &[(HwcLayerId, Composition)]) {
        for &(hwc_layer, composition) in changed {
            if let Some(layer) = self.layer_by_hwc(hwc_layer) {
                layer.composition = composition;
            }
        }
    }

    /// Applies display-level requests. Only the flip-client-target bit is
    /// honoured.
    pub fn apply_display_requests(&mut self, requests: DisplayRequests) {
        self.state.flip_client_target = requests.contains(DisplayRequests::FLIP_CLIENT_TARGET);
    }

    /// Resets every layer's request state, then applies `requests`.
    pub fn apply_layer_requests(&mut self, requests: &[(HwcLayerId, LayerRequest)]) {
        for layer in &mut self.layers {
            layer.clear_client_target = false;
        }
        for &(hwc_layer, request) in requests {
            if let Some(layer) = self.layer_by_hwc(hwc_layer) {
                match request {
                    LayerRequest::ClearClientTarget => layer.clear_client_target = true,
                }
            }
        }
    }

    /// Returns `true` if the hardware applies the color transform itself.
    #[must_use]
    pub fn skip_color_transform(&self, hwc: &dyn HwComposer) -> bool {
        self.display.hwc_id.is_some_and(|id| {
            hwc.has_display_capability(id, DisplayCapability::SkipClientColorTransform)
        })
    }

    /// Presents the frame and collects its fences.
    ///
    /// Displays without hardware composition return an invalid present
    /// fence and no layer fences.
    pub fn present_and_get_frame_fences(&mut self, hwc: &mut dyn HwComposer) -> FrameFences {
        let Some(id) = self.display.hwc_id else {
            return FrameFences {
                present: FenceTime::invalid(),
                layers: Vec::new(),
            };
        };
        if let Err(err) = hwc.present_and_get_release_fences(id) {
            tracing::warn!(display = %id, status = err.0, "present failed");
        }
        let present = hwc.present_fence(id);
        let layers = self
            .layers
            .iter()
            .filter_map(OutputLayer::hwc_layer)
            .map(|layer| (layer, hwc.layer_release_fence(id, layer)))
            .collect();
        hwc.clear_release_fences(id);
        FrameFences { present, layers }
    }

    fn layer_by_hwc(&mut self, hwc_layer: HwcLayerId) -> Option<&mut OutputLayer> {
        self.layers
            .iter_mut()
            .find(|l| l.hwc_layer == Some(hwc_layer))
    }

    fn emit(&self, tracer: &mut Tracer<'_>, error: Option<HwcError>) {
        tracer.composition(&CompositionEvent {
            display: self.display.hwc_id,
            uses_client: self.state.uses_client,
            uses_device: self.state.uses_device,
            hwc_error: error.map(|e| e.0),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::HostTime;
    use crate::vsync::FenceState;
    use alloc::vec;

    const DISPLAY: DisplayId = DisplayId(42);

    #[derive(Default)]
    struct ScriptedHwc {
        result: Option<Result<Option<DeviceCompositionChanges>, HwcError>>,
        queried_with: Vec<bool>,
        skip_color_transform: bool,
        presented: u32,
        cleared: u32,
    }

    impl HwComposer for ScriptedHwc {
        fn device_composition_changes(
            &mut self,
            display: DisplayId,
            any_client: bool,
        ) -> Result<Option<DeviceCompositionChanges>, HwcError> {
            assert_eq!(display, DISPLAY, "queried the wrong display");
            self.queried_with.push(any_client);
            self.result.take().unwrap_or(Ok(None))
        }

        fn has_display_capability(&self, _: DisplayId, _: DisplayCapability) -> bool {
            self.skip_color_transform
        }

        fn present_and_get_release_fences(&mut self, _: DisplayId) -> Result<(), HwcError> {
            self.presented += 1;
            Ok(())
        }

        fn present_fence(&self, _: DisplayId) -> FenceTime {
            FenceTime::signaled(HostTime(1_000))
        }

        fn layer_release_fence(&self, _: DisplayId, layer: HwcLayerId) -> FenceTime {
            FenceTime::signaled(HostTime(layer.0 as i64))
        }

        fn clear_release_fences(&mut self, _: DisplayId) {
            self.cleared += 1;
        }
    }

    fn hwc_output() -> DisplayOutput {
        let mut output = DisplayOutput::new(DisplayContext::physical(DISPLAY, "internal"));
        output.push_layer("wallpaper", Some(HwcLayerId(1)), Composition::Device);
        output.push_layer("app", Some(HwcLayerId(2)), Composition::Device);
        output
    }

    #[test]
    fn non_hwc_display_takes_early_out() {
        let mut output = DisplayOutput::new(DisplayContext::virtual_display("screen record"));
        output.push_layer("app", Some(HwcLayerId(1)), Composition::Device);
        let mut hwc = ScriptedHwc::default();

        let state = output.choose_strategy(&mut hwc);
        assert!(state.uses_client, "virtual displays are GPU composed");
        assert!(!state.uses_device);
        assert!(hwc.queried_with.is_empty(), "hardware never queried");
        assert!(!output.skip_color_transform(&hwc));
    }

    #[test]
    fn hwc_error_falls_back_to_client() {
        let mut output = hwc_output();
        let mut hwc = ScriptedHwc {
            result: Some(Err(HwcError(-38))),
            ..ScriptedHwc::default()
        };

        let state = output.choose_strategy(&mut hwc);
        assert_eq!(hwc.queried_with, [false], "no layer needed the GPU");
        assert!(state.uses_client);
        assert!(!state.uses_device);
    }

    #[test]
    fn all_device_layers_use_device_only() {
        let mut output = hwc_output();
        let mut hwc = ScriptedHwc::default();

        let state = output.choose_strategy(&mut hwc);
        assert!(!state.uses_client);
        assert!(state.uses_device);
        assert!(!state.flip_client_target);
    }

    #[test]
    fn hardware_changes_are_applied() {
        let mut output = hwc_output();
        output.push_layer("overlay", None, Composition::Device);
        let mut hwc = ScriptedHwc {
            result: Some(Ok(Some(DeviceCompositionChanges {
                changed_types: vec![
                    (HwcLayerId(2), Composition::Client),
                    (HwcLayerId(99), Composition::SolidColor),
                ],
                display_requests: DisplayRequests::FLIP_CLIENT_TARGET,
                layer_requests: vec![
                    (HwcLayerId(1), LayerRequest::ClearClientTarget),
                    (HwcLayerId(99), LayerRequest::ClearClientTarget),
                ],
            }))),
            ..ScriptedHwc::default()
        };

        let state = output.choose_strategy(&mut hwc);
        assert_eq!(hwc.queried_with, [true], "the overlay has no hardware layer");
        assert!(state.uses_client);
        assert!(state.uses_device, "the wallpaper stays on the hardware");
        assert!(state.flip_client_target);

        let layers = output.layers();
        assert_eq!(layers[1].composition(), Composition::Client);
        assert!(layers[0].clear_client_target());
        assert!(!layers[1].clear_client_target());
    }

    #[test]
    fn layer_requests_reset_previous_frame() {
        let mut output = hwc_output();
        output.apply_layer_requests(&[(HwcLayerId(2), LayerRequest::ClearClientTarget)]);
        assert!(output.layers()[1].clear_client_target());

        output.apply_layer_requests(&[]);
        assert!(
            output.layers().iter().all(|l| !l.clear_client_target()),
            "every layer is prepared before requests apply"
        );
    }

    #[test]
    fn display_requests_only_honour_flip() {
        let mut output = hwc_output();
        output.apply_display_requests(DisplayRequests::WRITE_CLIENT_TARGET_TO_OUTPUT);
        assert!(!output.state().flip_client_target);
        output.apply_display_requests(DisplayRequests(u32::MAX));
        assert!(output.state().flip_client_target);
    }

    #[test]
    fn empty_stack_uses_neither_path() {
        let mut output = DisplayOutput::new(DisplayContext::physical(DISPLAY, "internal"));
        let state = output.choose_strategy(&mut ScriptedHwc::default());
        assert!(!state.uses_client);
        assert!(!state.uses_device);
    }

    #[test]
    fn present_collects_fences() {
        let mut output = hwc_output();
        output.push_layer("gpu only", None, Composition::Client);
        let mut hwc = ScriptedHwc::default();

        let fences = output.present_and_get_frame_fences(&mut hwc);
        assert_eq!(hwc.presented, 1);
        assert_eq!(hwc.cleared, 1);
        assert_eq!(fences.present.state(), FenceState::Signaled(HostTime(1_000)));
        let ids: Vec<_> = fences.layers.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, [HwcLayerId(1), HwcLayerId(2)]);

        let mut virt = DisplayOutput::new(DisplayContext::virtual_display("cast"));
        let fences = virt.present_and_get_frame_fences(&mut hwc);
        assert_eq!(fences.present.state(), FenceState::Invalid);
        assert!(fences.layers.is_empty());
        assert_eq!(hwc.presented, 1, "virtual displays never reach the hardware");
    }

    #[test]
    fn skip_color_transform_checks_capability() {
        let output = hwc_output();
        let hwc = ScriptedHwc {
            skip_color_transform: true,
            ..ScriptedHwc::default()
        };
        assert!(output.skip_color_transform(&hwc));
    }
}
