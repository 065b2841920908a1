//! Protocol constants, transfer configurations and the line-type selector.

use std::time::Duration;

/// User agent sent on every HTTP request.
pub const USER_AGENT: &str = "Mozilla/5.0 SpeedTest++";

/// Endpoint returning the caller's public IP, ISP and geolocation.
pub const IP_INFO_URL: &str = "http://speedtest.ookla.com/api/ipaddress.php";

/// Endpoint returning the XML catalogue of measurement servers.
pub const SERVER_LIST_URL: &str = "http://www.speedtest.net/speedtest-servers.php";

/// Endpoint accepting the share-result form submission.
pub const SHARE_API_URL: &str = "http://www.speedtest.net/api/api.php";

/// Referer header required by the share endpoint.
pub const SHARE_API_REFERER: &str = "http://c.speedtest.net/flash/speedtest.swf";

/// Key mixed into the share payload hash.
pub const SHARE_API_KEY: &str = "297aae72";

/// Base URL of the shareable result image.
pub const SHARE_RESULT_URL: &str = "http://www.speedtest.net/result/";

/// Oldest server protocol version the client will talk to.
pub const MIN_SERVER_VERSION: f64 = 2.3;

/// Ping samples taken per latency measurement.
pub const LATENCY_SAMPLE_COUNT: usize = 10;

/// Ping samples taken per jitter measurement.
pub const JITTER_SAMPLE_COUNT: usize = 40;

/// Candidates probed (successfully) when picking the best server.
pub const SERVER_SAMPLE_COUNT: usize = 10;

/// Timeout for one-shot HTTP requests.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(20);

/// How many of a worker's sorted samples to discard before averaging.
///
/// The historical client carries a disabled policy that skips the lowest
/// quartile and drops the two highest samples once a worker produced ten
/// or more. [`SampleTrim::NONE`] keeps every sample and is the default
/// everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleTrim {
    /// Samples discarded from the low end of the sorted list.
    pub skip_lowest: usize,
    /// Samples discarded from the high end of the sorted list.
    pub drop_highest: usize,
}

impl SampleTrim {
    /// Keep every sample.
    pub const NONE: SampleTrim = SampleTrim {
        skip_lowest: 0,
        drop_highest: 0,
    };
}

/// Parameters of one throughput test direction.
#[derive(Debug, Clone, PartialEq)]
pub struct TestConfig {
    /// Size of the first transfer in bytes.
    pub start_size: u64,
    /// The transfer loop stops once the next size would reach this bound.
    pub max_size: u64,
    /// Growth of the transfer size between iterations.
    pub incr_size: u64,
    /// Socket buffer size in bytes, reused for a worker's whole lifetime.
    pub buffer_size: usize,
    /// Upper bound on wall time per worker in milliseconds. The name is
    /// historical; the loop exits as soon as it is exceeded.
    pub min_test_time_ms: u64,
    /// Number of concurrent workers, one connection each.
    pub concurrency: usize,
    /// Human-readable line-type label for renderers.
    pub label: &'static str,
    /// Per-worker sample trimming policy.
    pub trim: SampleTrim,
}

const SLOW_LABEL: &str = "Very-slow-line line type detected: profile selected slowband";
const NARROW_LABEL: &str = "Buffering-lover line type detected: profile selected narrowband";
const BROADBAND_LABEL: &str = "Broadband line type detected: profile selected broadband";
const FIBER_LABEL: &str = "Fiber / Lan line type detected: profile selected fiber";

/// Short download run used only to classify the link into a profile.
pub const PREFLIGHT_DOWNLOAD: TestConfig = TestConfig {
    start_size: 600_000,
    max_size: 2_000_000,
    incr_size: 125_000,
    buffer_size: 4096,
    min_test_time_ms: 10_000,
    concurrency: 2,
    label: "Preflight check",
    trim: SampleTrim::NONE,
};

const SLOW_DOWNLOAD: TestConfig = TestConfig {
    start_size: 100_000,
    max_size: 5_000_000,
    incr_size: 100_000,
    buffer_size: 4096,
    min_test_time_ms: 20_000,
    concurrency: 2,
    label: SLOW_LABEL,
    trim: SampleTrim::NONE,
};

const SLOW_UPLOAD: TestConfig = TestConfig {
    start_size: 50_000,
    max_size: 3_500_000,
    incr_size: 50_000,
    buffer_size: 4096,
    min_test_time_ms: 20_000,
    concurrency: 2,
    label: SLOW_LABEL,
    trim: SampleTrim::NONE,
};

const NARROW_DOWNLOAD: TestConfig = TestConfig {
    start_size: 1_000_000,
    max_size: 100_000_000,
    incr_size: 500_000,
    buffer_size: 16_384,
    min_test_time_ms: 20_000,
    concurrency: 4,
    label: NARROW_LABEL,
    trim: SampleTrim::NONE,
};

const NARROW_UPLOAD: TestConfig = TestConfig {
    start_size: 500_000,
    max_size: 70_000_000,
    incr_size: 250_000,
    buffer_size: 16_384,
    min_test_time_ms: 20_000,
    concurrency: 4,
    label: NARROW_LABEL,
    trim: SampleTrim::NONE,
};

const BROADBAND_DOWNLOAD: TestConfig = TestConfig {
    start_size: 2_500_000,
    max_size: 100_000_000,
    incr_size: 750_000,
    buffer_size: 65_536,
    min_test_time_ms: 20_000,
    concurrency: 16,
    label: BROADBAND_LABEL,
    trim: SampleTrim::NONE,
};

const BROADBAND_UPLOAD: TestConfig = TestConfig {
    start_size: 1_250_000,
    max_size: 70_000_000,
    incr_size: 375_000,
    buffer_size: 65_536,
    min_test_time_ms: 20_000,
    concurrency: 8,
    label: BROADBAND_LABEL,
    trim: SampleTrim::NONE,
};

const FIBER_DOWNLOAD: TestConfig = TestConfig {
    start_size: 5_000_000,
    max_size: 100_000_000,
    incr_size: 1_000_000,
    buffer_size: 131_072,
    min_test_time_ms: 20_000,
    concurrency: 32,
    label: FIBER_LABEL,
    trim: SampleTrim::NONE,
};

const FIBER_UPLOAD: TestConfig = TestConfig {
    start_size: 2_500_000,
    max_size: 70_000_000,
    incr_size: 500_000,
    buffer_size: 131_072,
    min_test_time_ms: 20_000,
    concurrency: 16,
    label: FIBER_LABEL,
    trim: SampleTrim::NONE,
};

/// Choose `(download, upload)` configurations from the preflight speed.
///
/// Total over `pre_speed_mbps`: up to 4 Mbit/s is slowband, above 4 and up
/// to 30 narrowband, between 30 and 150 exclusive broadband, 150 and above
/// fiber.
pub fn profile_for(pre_speed_mbps: f64) -> (&'static TestConfig, &'static TestConfig) {
    if pre_speed_mbps > 4.0 && pre_speed_mbps <= 30.0 {
        (&NARROW_DOWNLOAD, &NARROW_UPLOAD)
    } else if pre_speed_mbps > 30.0 && pre_speed_mbps < 150.0 {
        (&BROADBAND_DOWNLOAD, &BROADBAND_UPLOAD)
    } else if pre_speed_mbps >= 150.0 {
        (&FIBER_DOWNLOAD, &FIBER_UPLOAD)
    } else {
        (&SLOW_DOWNLOAD, &SLOW_UPLOAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_boundaries() {
        let (d, u) = profile_for(2.5);
        assert_eq!(d, &SLOW_DOWNLOAD);
        assert_eq!(u, &SLOW_UPLOAD);

        let (d, _) = profile_for(4.0);
        assert_eq!(d, &SLOW_DOWNLOAD);

        let (d, u) = profile_for(30.0);
        assert_eq!(d, &NARROW_DOWNLOAD);
        assert_eq!(u, &NARROW_UPLOAD);

        let (d, _) = profile_for(149.99);
        assert_eq!(d, &BROADBAND_DOWNLOAD);

        let (d, u) = profile_for(150.0);
        assert_eq!(d, &FIBER_DOWNLOAD);
        assert_eq!(u, &FIBER_UPLOAD);
    }

    #[test]
    fn profile_is_total() {
        for speed in [-1.0, 0.0, 4.01, 29.99, 30.01, 1e9, f64::NAN] {
            let (d, u) = profile_for(speed);
            assert!(!d.label.is_empty());
            assert!(!u.label.is_empty());
        }
    }

    #[test]
    fn configs_are_internally_consistent() {
        let all = [
            &PREFLIGHT_DOWNLOAD,
            &SLOW_DOWNLOAD,
            &SLOW_UPLOAD,
            &NARROW_DOWNLOAD,
            &NARROW_UPLOAD,
            &BROADBAND_DOWNLOAD,
            &BROADBAND_UPLOAD,
            &FIBER_DOWNLOAD,
            &FIBER_UPLOAD,
        ];
        for config in all {
            assert!(config.start_size <= config.max_size, "{}", config.label);
            assert!(config.incr_size >= 1);
            assert!(config.buffer_size >= 1);
            assert!(config.min_test_time_ms > 0);
            assert!(config.concurrency >= 1);
            assert_eq!(config.trim, SampleTrim::NONE);
        }
    }
}
