//! `replay`: feed a captured sentence log through a fresh tracker.

use std::io::Read;
use std::path::Path;

use kistrack_core::{DEVICE_PROTOCOL, DeviceTracker, IngestOutcome, PHYMAP_PROTOCOL};
use kistrack_proto::ServerLine;
use tracing::{debug, info};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output;

/// Tally of what a replay did with each non-empty line.
#[derive(Debug, Default, PartialEq, Eq)]
struct ReplayStats {
    lines: usize,
    applied: usize,
    dropped: usize,
    malformed: usize,
    ignored: usize,
}

pub fn handle(args: &ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let capture = read_capture(&args.file)?;
    let tracker = DeviceTracker::new();

    let stats = replay_lines(&tracker, capture.lines());
    info!(
        file = %args.file.display(),
        lines = stats.lines,
        applied = stats.applied,
        dropped = stats.dropped,
        malformed = stats.malformed,
        ignored = stats.ignored,
        "replay finished"
    );

    let rendered = output::render_summary(global.output, &tracker.summary())?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn read_capture(path: &Path) -> Result<String, CliError> {
    let read_err = |source| CliError::CaptureRead {
        path: path.to_path_buf(),
        source,
    };

    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map_err(read_err)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).map_err(read_err)
}

/// Route each sentence to the tracker the way a live link would.
fn replay_lines<'a>(tracker: &DeviceTracker, lines: impl Iterator<Item = &'a str>) -> ReplayStats {
    let mut stats = ReplayStats::default();

    for (index, raw) in lines.enumerate() {
        if raw.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        let line = match ServerLine::parse(raw) {
            Ok(line) => line,
            Err(e) => {
                debug!(line = index + 1, error = %e, "skipping malformed line");
                stats.malformed += 1;
                continue;
            }
        };

        let outcome = match line.protocol.as_str() {
            PHYMAP_PROTOCOL => tracker.handle_phymap(&line.fields),
            DEVICE_PROTOCOL => tracker.handle_device(&line.fields),
            _ => IngestOutcome::Unsupported,
        };
        match outcome {
            IngestOutcome::Applied { .. } => stats.applied += 1,
            IngestOutcome::Dropped(_) => stats.dropped += 1,
            IngestOutcome::Unsupported => stats.ignored += 1,
        }
    }

    stats
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use kistrack_core::{KIS_PHY_ANY, PhyId};
    use pretty_assertions::assert_eq;

    const CAPTURE: &str = "\
*KISMET: 2011.03.R1 1700000000 \x01lab\x01 1
*PROTOCOLS: PHYMAP,DEVICE
*PHYMAP: 0 IEEE802.11 1000 800 10 5 50

*PHYMAP: 1 BTLE 40 0 0 0 2
not a sentence
*PHYMAP: 2 broken
*PHYMAP: 0 IEEE802.11 1200 900 12 5 60
*DEVICE: 00:11:22:33:44:55
";

    #[test]
    fn replay_tallies_every_line() {
        let tracker = DeviceTracker::new();
        let stats = replay_lines(&tracker, CAPTURE.lines());
        assert_eq!(
            stats,
            ReplayStats {
                lines: 8,
                applied: 3,
                dropped: 1,
                malformed: 1,
                ignored: 3,
            }
        );
    }

    #[test]
    fn replay_accumulates_global_counters() {
        let tracker = DeviceTracker::new();
        replay_lines(&tracker, CAPTURE.lines());

        assert_eq!(tracker.count_packets(PhyId::new(0)), 1200);
        assert_eq!(tracker.count_packets(PhyId::new(1)), 40);
        assert_eq!(tracker.count_packets(KIS_PHY_ANY), 1240);
        assert_eq!(tracker.packet_rate(KIS_PHY_ANY), 62);
        assert_eq!(tracker.phys().len(), 2);
    }

    #[test]
    fn missing_capture_names_the_path() {
        let err = read_capture(Path::new("/nonexistent/capture.log")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/capture.log"));
    }
}
