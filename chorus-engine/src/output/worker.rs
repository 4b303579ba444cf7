//! Output worker thread.
//!
//! The loop owns the device: all device calls happen here, with the
//! controller mutex released around anything that may block. The mutex is
//! always reacquired before the pending command is re-checked, so a
//! synchronous command observes a total order with respect to this thread.

use super::control::{OutputCommand, OutputControl, OutputState};
use crate::error::Error;
use crate::filter::render_chunk;
use crate::output::plugin::{OutputPlugin, PlayDelay};
use crate::output::source::SourceState;
use std::sync::{Arc, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, warn};

type Guard<'a> = MutexGuard<'a, OutputState>;
type Device = Box<dyn OutputPlugin>;

pub(super) fn task(ctrl: Arc<OutputControl>) {
    debug!("output worker running for {:?}", ctrl.name());

    let mut g = ctrl.cell.lock();
    let mut device = g
        .device
        .take()
        .expect("output thread started without a device");

    loop {
        match g.command {
            OutputCommand::None => {
                if g.open
                    && g.source.state() == SourceState::Open
                    && g.allow_play
                    && !g.caught_interrupted
                {
                    let (g2, worked) = ctrl.internal_play(g, &mut device);
                    g = g2;
                    if worked {
                        // don't wait if there may be more chunks in the pipe
                        continue;
                    }
                }

                g.woken_for_play = false;
                g = ctrl.cell.wait_worker(g);
            }

            OutputCommand::Enable => {
                let (g2, _) = ctrl.internal_enable(g, &mut device);
                g = g2;
                ctrl.command_finished(&mut g);
            }

            OutputCommand::Disable => {
                g = ctrl.internal_disable(g, &mut device);
                ctrl.command_finished(&mut g);
            }

            OutputCommand::Open => {
                g = ctrl.internal_open(g, &mut device);
                ctrl.command_finished(&mut g);
            }

            OutputCommand::Close => {
                g = ctrl.internal_check_close(g, &mut device, false);
                ctrl.command_finished(&mut g);
            }

            OutputCommand::Pause => {
                if !g.open {
                    // the output failed after PAUSE was submitted
                    ctrl.command_finished(&mut g);
                } else {
                    g.caught_interrupted = false;
                    g = ctrl.internal_pause(g, &mut device);
                }
            }

            OutputCommand::Release => {
                if !g.open {
                    // the output failed after RELEASE was submitted
                    ctrl.command_finished(&mut g);
                } else {
                    g.caught_interrupted = false;

                    if ctrl.config.always_on {
                        // pause instead of closing; the source data has
                        // been invalidated by stopping actual playback
                        if g.source.state() == SourceState::Open {
                            g.source.cancel();
                        }
                        g = ctrl.internal_pause(g, &mut device);
                    } else {
                        g = ctrl.internal_close(g, &mut device, false);
                        ctrl.command_finished(&mut g);
                    }
                }
            }

            OutputCommand::Drain => {
                if g.open {
                    g = ctrl.internal_drain(g, &mut device);
                }
                ctrl.command_finished(&mut g);
            }

            OutputCommand::Cancel => {
                g.caught_interrupted = false;

                if g.source.state() == SourceState::Open {
                    g.source.cancel();
                }

                if g.open {
                    g.playing = false;
                    let (g2, _) = ctrl.cell.unlocked(g, || device.cancel());
                    g = g2;
                }

                ctrl.command_finished(&mut g);
            }

            OutputCommand::Kill => {
                g = ctrl.internal_disable(g, &mut device);
                if g.source.state() == SourceState::Open {
                    g.source.cancel();
                }
                g.device = Some(device);
                ctrl.command_finished(&mut g);
                debug!("output worker exiting for {:?}", ctrl.name());
                return;
            }
        }
    }
}

impl OutputControl {
    fn failure(&self, g: &mut Guard<'_>, e: Error) {
        debug_assert!(!g.open);
        g.last_error = Some(e);
        g.fail_timer = Some(Instant::now());
        self.notify_error();
    }

    fn internal_enable<'a>(&'a self, mut g: Guard<'a>, device: &mut Device) -> (Guard<'a>, bool) {
        if g.really_enabled {
            return (g, true);
        }

        g.last_error = None;

        let (mut g, result) = self.cell.unlocked(g, || device.enable());
        match result {
            Ok(()) => {
                g.really_enabled = true;
                (g, true)
            }
            Err(e) => {
                error!("failed to enable {:?}: {e}", self.name);
                self.failure(&mut g, e);
                (g, false)
            }
        }
    }

    fn internal_disable<'a>(&'a self, mut g: Guard<'a>, device: &mut Device) -> Guard<'a> {
        if !g.really_enabled {
            return g;
        }

        g = self.internal_check_close(g, device, false);
        g.really_enabled = false;

        let (g, _) = self.cell.unlocked(g, || device.disable());
        g
    }

    fn internal_open<'a>(&'a self, mut g: Guard<'a>, device: &mut Device) -> Guard<'a> {
        g.should_reopen = false;

        // enable the device (just in case the last enable has failed)
        let (mut g, enabled) = self.internal_enable(g, device);
        if !enabled {
            return g;
        }

        g.last_error = None;
        g.fail_timer = None;
        g.caught_interrupted = false;
        g.skip_delay = true;

        let (format, pipe) = match &g.request {
            Some(request) => (request.format, Arc::clone(&request.pipe)),
            None => {
                warn!("OPEN without a request on {:?}", self.name);
                return g;
            }
        };

        if g.source.state() != SourceState::Closed {
            // a flushed source is still attached to the pipe
            g.source.close();
        }
        let source_format = g.source.open(format, pipe);

        self.internal_open2(g, device, source_format)
    }

    fn internal_open2<'a>(
        &'a self,
        mut g: Guard<'a>,
        device: &mut Device,
        format: chorus_common::AudioFormat,
    ) -> Guard<'a> {
        if g.open && g.device_format != Some(format) {
            // if the filtered format changes, the device must be reopened
            let drain = g.playing;
            g = self.internal_close_output(g, device, drain);
        }

        if g.open {
            return g;
        }

        let (mut g, result) = self.cell.unlocked(g, || device.open(format));
        match result {
            Ok(device_format) => {
                g.open = true;
                g.playing = false;
                g.device_format = Some(format);
                if device_format != format {
                    debug!(
                        "{:?}: device runs at {device_format} for input {format}",
                        self.name
                    );
                }
            }
            Err(e) => {
                error!("failed to open {:?}: {e}", self.name);
                g.source.close();
                self.failure(&mut g, e);
            }
        }
        g
    }

    /// Close the device but keep the source attached (format change).
    fn internal_close_output<'a>(
        &'a self,
        mut g: Guard<'a>,
        device: &mut Device,
        drain: bool,
    ) -> Guard<'a> {
        debug_assert!(g.open);
        g.open = false;
        g.device_format = None;

        let (g, _) = self.cell.unlocked(g, || device.close(drain));
        g
    }

    fn internal_close<'a>(&'a self, mut g: Guard<'a>, device: &mut Device, drain: bool) -> Guard<'a> {
        debug_assert!(g.open);
        g.open = false;
        g.device_format = None;

        let (mut g, _) = self.cell.unlocked(g, || device.close(drain));
        g.source.close();
        g
    }

    fn internal_check_close<'a>(
        &'a self,
        g: Guard<'a>,
        device: &mut Device,
        drain: bool,
    ) -> Guard<'a> {
        if g.open {
            self.internal_close(g, device, drain)
        } else {
            g
        }
    }

    fn internal_close_error<'a>(&'a self, g: Guard<'a>, device: &mut Device, e: Error) -> Guard<'a> {
        let mut g = self.internal_check_close(g, device, false);
        self.failure(&mut g, e);
        g
    }

    /// Wait until the device's suggested delay reaches zero.
    ///
    /// Returns false if a command arrived meanwhile.
    fn wait_for_delay<'a>(&'a self, mut g: Guard<'a>, device: &Device) -> (Guard<'a>, bool) {
        loop {
            match device.delay() {
                PlayDelay::Ready => return (g, true),
                PlayDelay::Indefinite => {
                    g = self.cell.wait_worker(g);
                }
                PlayDelay::For(d) => {
                    let (g2, _) = self.cell.wait_worker_timeout(g, d);
                    g = g2;
                }
            }

            if g.command != OutputCommand::None {
                return (g, false);
            }
        }
    }

    /// Render the next pipe chunk into the source, if none is pending.
    ///
    /// Filtering runs with the mutex released; a cancel or close that
    /// happened meanwhile is detected via the source generation and the
    /// stale result discarded.
    fn fill_source_or_close<'a>(
        &'a self,
        g: Guard<'a>,
        device: &mut Device,
    ) -> (Guard<'a>, bool) {
        debug_assert!(g.source.state() == SourceState::Open);

        if g.source.has_pending_data() {
            return (g, true);
        }

        let chunk = match g.source.next_chunk() {
            Some(chunk) => chunk,
            None => return (g, false),
        };

        let generation = g.source.generation();
        let (mut rg, mut other_rg) = g.source.filter_snapshots();
        let output_filter = g.source.output_filter();

        let (mut g, rendered) = self.cell.unlocked(g, || {
            render_chunk(&chunk, &mut rg, &mut other_rg, output_filter.as_ref())
        });

        match rendered {
            Ok(data) => {
                if g.source.state() == SourceState::Open
                    && g.source.generation() == generation
                    && !g.source.has_pending_data()
                {
                    g.source.install(&chunk, data, rg, other_rg);
                    (g, true)
                } else {
                    // invalidated while filtering ran unlocked
                    (g, false)
                }
            }
            Err(e) => {
                error!("failed to filter for {:?}: {e}", self.name);
                let g = self.internal_close_error(g, device, e);
                (g, false)
            }
        }
    }

    /// Feed the current rendered chunk to the device, retrying short
    /// writes, until the chunk is exhausted or a command arrives.
    fn play_chunk<'a>(&'a self, mut g: Guard<'a>, device: &mut Device) -> (Guard<'a>, bool) {
        debug_assert!(g.source.state() == SourceState::Open);

        // ensure pending tags are flushed in all cases
        if let Some(tag) = g.source.read_tag() {
            if self.config.tags {
                let (g2, result) = self.cell.unlocked(g, || device.send_tag(&tag));
                g = g2;
                match result {
                    Ok(()) => {}
                    Err(Error::Interrupted) => {
                        g.caught_interrupted = true;
                        return (g, false);
                    }
                    Err(e) => {
                        warn!("failed to send tag to {:?}: {e}", self.name);
                    }
                }
            }
        }

        while g.command == OutputCommand::None {
            if g.source.peek_data().is_empty() {
                break;
            }

            if g.skip_delay {
                g.skip_delay = false;
            } else {
                let (g2, ready) = self.wait_for_delay(g, device);
                g = g2;
                if !ready {
                    break;
                }
            }

            let data = g.source.peek_data().to_vec();
            if data.is_empty() {
                break;
            }

            let (g2, result) = self.cell.unlocked(g, || device.play(&data));
            g = g2;

            match result {
                Ok(nsamples) => {
                    debug_assert!(nsamples > 0);
                    debug_assert!(nsamples <= data.len());
                    if g.source.has_pending_data() {
                        g.source.consume_data(nsamples);
                    }
                    // there's data to be drained from now on
                    g.playing = true;
                }
                Err(Error::Interrupted) => {
                    g.caught_interrupted = true;
                    return (g, false);
                }
                Err(e) => {
                    error!("failed to play on {:?}: {e}", self.name);
                    let g = self.internal_close_error(g, device, e);
                    return (g, false);
                }
            }
        }

        (g, true)
    }

    /// One round of the play loop; returns whether any work was done.
    fn internal_play<'a>(&'a self, g: Guard<'a>, device: &mut Device) -> (Guard<'a>, bool) {
        let (mut g, filled) = self.fill_source_or_close(g, device);
        if !filled {
            return (g, false);
        }

        debug_assert!(!g.in_playback_loop);
        g.in_playback_loop = true;

        let mut n = 0u32;
        loop {
            if g.command != OutputCommand::None {
                break;
            }

            n += 1;
            if n >= 64 {
                // wake up the player every now and then to give it a
                // chance to refill the pipe before it runs empty
                if let Some(client) = self.client() {
                    let (g2, _) = self.cell.unlocked(g, || client.chunks_consumed());
                    g = g2;
                }
                n = 0;
                continue;
            }

            let (g2, keep_going) = self.play_chunk(g, device);
            g = g2;
            if !keep_going {
                break;
            }

            if g.source.state() != SourceState::Open {
                break;
            }
            let (g2, filled) = self.fill_source_or_close(g, device);
            g = g2;
            if !filled {
                break;
            }
        }

        g.in_playback_loop = false;

        if let Some(client) = self.client() {
            let (g2, _) = self.cell.unlocked(g, || client.chunks_consumed());
            g = g2;
        }

        (g, true)
    }

    fn internal_pause<'a>(&'a self, g: Guard<'a>, device: &mut Device) -> Guard<'a> {
        let (mut g, _) = self.cell.unlocked(g, || device.begin_pause());
        g.pause = true;

        self.command_finished(&mut g);

        loop {
            let (g2, ready) = self.wait_for_delay(g, device);
            g = g2;
            if !ready {
                break;
            }

            let (g2, result) = self.cell.unlocked(g, || device.iterate_pause());
            g = g2;

            let success = match result {
                Ok(()) => true,
                Err(Error::Interrupted) => false,
                Err(e) => {
                    error!("failed to pause {:?}: {e}", self.name);
                    false
                }
            };

            if !success {
                g = self.internal_check_close(g, device, false);
                break;
            }

            if g.command != OutputCommand::None {
                break;
            }
        }

        g.pause = false;

        let (mut g, _) = self.cell.unlocked(g, || device.end_pause());

        g.skip_delay = true;
        // ignore drain commands until we got something new to play
        g.playing = false;
        g
    }

    fn internal_drain<'a>(&'a self, mut g: Guard<'a>, device: &mut Device) -> Guard<'a> {
        debug_assert!(g.source.state() == SourceState::Open);

        // after a flush, we can't play until the source is reopened
        g.should_reopen = true;

        // after this method finishes, there's nothing left to be drained
        g.playing = false;

        let tail = g.source.flush();

        let (g, result) = self.cell.unlocked(g, || -> Result<(), Error> {
            let mut buffer = tail;
            while !buffer.is_empty() {
                let nsamples = device.play(&buffer)?;
                debug_assert!(nsamples > 0);
                buffer.drain(..nsamples);
            }
            device.drain()
        });

        match result {
            Ok(()) => g,
            Err(Error::Interrupted) => {
                let mut g = g;
                g.caught_interrupted = true;
                g
            }
            Err(e) => {
                error!("failed to flush filter on {:?}: {e}", self.name);
                self.internal_close_error(g, device, e)
            }
        }
    }
}
