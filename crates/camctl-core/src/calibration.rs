//! Calibration and unit mapping
//!
//! Every camera speaks in native integer units. Callers speak in degrees,
//! degrees per second and zoom fractions. An [`AxisRange`] is the linear map
//! between the two for one quantity; a [`Calibration`] bundles the ranges a
//! dialect established when it opened the device.

use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Degrees per native step on Canon VC-C heads (pan, tilt and their speeds)
pub const CANON_UNIT_FACTOR: f64 = 0.1125;

/// Linear map between a native integer range and a physical range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    /// Native value at the physical minimum
    pub native_min: i32,
    /// Native value at the physical maximum
    pub native_max: i32,
    /// Physical minimum
    pub min: f64,
    /// Physical maximum
    pub max: f64,
}

impl AxisRange {
    /// Create a range from explicit bounds
    pub const fn new(native_min: i32, native_max: i32, min: f64, max: f64) -> Self {
        Self {
            native_min,
            native_max,
            min,
            max,
        }
    }

    /// Range whose physical values are the native ones times `factor`
    pub fn scaled(native_min: i32, native_max: i32, factor: f64) -> Self {
        Self::new(
            native_min,
            native_max,
            native_min as f64 * factor,
            native_max as f64 * factor,
        )
    }

    /// Range symmetric around the native midpoint.
    ///
    /// `center = min + (max - min) / 2` in integer arithmetic, then each side
    /// is the step distance to the center times `unit_factor`.
    pub fn centered(native_min: i32, native_max: i32, unit_factor: f64) -> Self {
        let center = native_min + (native_max - native_min) / 2;
        Self::new(
            native_min,
            native_max,
            -((center - native_min) as f64) * unit_factor,
            (native_max - center) as f64 * unit_factor,
        )
    }

    /// Physical span
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Clamp a physical value into the range. NaN maps to the minimum.
    pub fn clamp(&self, value: f64) -> f64 {
        let (lo, hi) = if self.min <= self.max {
            (self.min, self.max)
        } else {
            (self.max, self.min)
        };
        if value.is_nan() {
            return self.min;
        }
        value.max(lo).min(hi)
    }

    /// Clamp, then map a physical value to the nearest native value
    pub fn to_native(&self, value: f64) -> i32 {
        let span = self.span();
        if span == 0.0 {
            return self.native_min;
        }
        let fraction = (self.clamp(value) - self.min) / span;
        let native_span = (self.native_max - self.native_min) as f64;
        self.native_min + (fraction * native_span).round() as i32
    }

    /// Map a native value back to physical units, without clamping
    pub fn to_physical(&self, native: i32) -> f64 {
        let native_span = self.native_max - self.native_min;
        if native_span == 0 {
            return self.min;
        }
        let fraction = (native - self.native_min) as f64 / native_span as f64;
        self.min + fraction * self.span()
    }

    /// Smallest physical step the native encoding can express
    pub fn resolution(&self) -> f64 {
        let native_span = (self.native_max - self.native_min).abs();
        if native_span == 0 {
            return 0.0;
        }
        self.span().abs() / native_span as f64
    }
}

/// One calibrated bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bound {
    /// Pan lower limit
    PanMin,
    /// Pan upper limit
    PanMax,
    /// Tilt lower limit
    TiltMin,
    /// Tilt upper limit
    TiltMax,
    /// Zoom upper limit
    ZoomMax,
    /// Slowest pan speed
    PanSpeedMin,
    /// Fastest pan speed
    PanSpeedMax,
    /// Slowest tilt speed
    TiltSpeedMin,
    /// Fastest tilt speed
    TiltSpeedMax,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bound::PanMin => "pan-min",
            Bound::PanMax => "pan-max",
            Bound::TiltMin => "tilt-min",
            Bound::TiltMax => "tilt-max",
            Bound::ZoomMax => "zoom-max",
            Bound::PanSpeedMin => "pan-speed-min",
            Bound::PanSpeedMax => "pan-speed-max",
            Bound::TiltSpeedMin => "tilt-speed-min",
            Bound::TiltSpeedMax => "tilt-speed-max",
        };
        f.write_str(s)
    }
}

/// Where a bound's value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    /// Read back from the device at open
    Discovered,
    /// Taken from the built-in table
    Default,
}

/// Pick the discovered value for `bound`, or fall back to `fallback` with a warning
pub fn resolve_bound(
    device: &str,
    bound: Bound,
    discovered: Option<i32>,
    fallback: i32,
    sources: &mut HashMap<Bound, RangeSource>,
) -> i32 {
    match discovered {
        Some(v) => {
            sources.insert(bound, RangeSource::Discovered);
            v
        }
        None => {
            warn!(
                device,
                %bound,
                fallback = %format!("{:#06x}", fallback),
                "no usable reply, using default range"
            );
            sources.insert(bound, RangeSource::Default);
            fallback
        }
    }
}

/// Ranges established for one open session
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Pan position, degrees
    pub pan: AxisRange,
    /// Tilt position, degrees
    pub tilt: AxisRange,
    /// Pan speed, degrees per second
    pub pan_speed: AxisRange,
    /// Tilt speed, degrees per second
    pub tilt_speed: AxisRange,
    /// Zoom position, 0 (wide) to 1 (tele)
    pub zoom: AxisRange,
    /// Zoom drive speed, native steps
    pub zoom_speed: AxisRange,
    /// Identification string reported by the device, if any
    pub device_info: Option<String>,
    sources: HashMap<Bound, RangeSource>,
}

impl Calibration {
    /// Calibration with hardcoded ranges
    pub fn new(
        pan: AxisRange,
        tilt: AxisRange,
        pan_speed: AxisRange,
        tilt_speed: AxisRange,
        zoom: AxisRange,
    ) -> Self {
        Self {
            pan,
            tilt,
            pan_speed,
            tilt_speed,
            zoom,
            zoom_speed: AxisRange::new(0, 7, 0.0, 7.0),
            device_info: None,
            sources: HashMap::new(),
        }
    }

    /// Attach the device info string
    pub fn with_device_info(mut self, info: impl Into<String>) -> Self {
        self.device_info = Some(info.into());
        self
    }

    /// Record per-bound provenance
    pub fn with_sources(mut self, sources: HashMap<Bound, RangeSource>) -> Self {
        self.sources = sources;
        self
    }

    /// Where `bound` came from; bounds never queried are defaults
    pub fn source(&self, bound: Bound) -> RangeSource {
        self.sources
            .get(&bound)
            .copied()
            .unwrap_or(RangeSource::Default)
    }

    /// True if any bound fell back to the built-in table
    pub fn used_defaults(&self) -> bool {
        self.sources.values().any(|s| *s == RangeSource::Default)
    }
}

/// Built-in native ranges for one device family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultRange {
    /// Device-name prefix; a trailing `*` is a wildcard and `"*"` matches anything
    pub pattern: &'static str,
    /// Pan native min/max
    pub pan: (i32, i32),
    /// Tilt native min/max
    pub tilt: (i32, i32),
    /// Zoom native max
    pub zoom_max: i32,
    /// Pan speed native min/max
    pub pan_speed: (i32, i32),
    /// Tilt speed native min/max
    pub tilt_speed: (i32, i32),
}

impl DefaultRange {
    /// True if `name` matches this entry's pattern
    pub fn matches(&self, name: &str) -> bool {
        let stem = self.pattern.strip_suffix('*').unwrap_or(self.pattern);
        name.starts_with(stem)
    }
}

/// First entry in `table` matching `name`
pub fn lookup<'a>(table: &'a [DefaultRange], name: &str) -> Option<&'a DefaultRange> {
    table.iter().find(|entry| entry.matches(name))
}

/// Canon VC-C family defaults, most specific first
pub const CANON_DEFAULTS: &[DefaultRange] = &[
    DefaultRange {
        pattern: "VC-C4R",
        pan: (0x7A19, 0x85E7),
        tilt: (0x7CE0, 0x8059),
        zoom_max: 0x0640,
        pan_speed: (0x0008, 0x0320),
        tilt_speed: (0x0008, 0x026A),
    },
    DefaultRange {
        pattern: "VC-C4",
        pan: (0x7C87, 0x8379),
        tilt: (0x7EF5, 0x8320),
        zoom_max: 0x0640,
        pan_speed: (0x0008, 0x0320),
        tilt_speed: (0x0008, 0x026A),
    },
    DefaultRange {
        pattern: "VC-C50i",
        pan: (0x7C87, 0x8379),
        tilt: (0x7EF5, 0x8320),
        zoom_max: 0x0A60,
        pan_speed: (0x0008, 0x0320),
        tilt_speed: (0x0008, 0x026A),
    },
    DefaultRange {
        pattern: "*",
        pan: (0x7C87, 0x8379),
        tilt: (0x7EF5, 0x8320),
        zoom_max: 0x0640,
        pan_speed: (0x0008, 0x0320),
        tilt_speed: (0x0008, 0x026A),
    },
];
