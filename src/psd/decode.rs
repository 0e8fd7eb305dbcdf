//! Parallel channel decompression
//!
//! Every layer channel and composite channel is an independent job. Jobs
//! run on a dedicated rayon pool; all of them run to completion before the
//! first failure, in job order, is reported.

use std::io;

use rayon::prelude::*;

use super::channel::Channel;
use super::composite::CompositeImage;
use super::layer::Layer;
use super::types::{bytes_per_row, PsdHeader};
use crate::error::PsdError;

struct DecodeJob<'a> {
    /// `None` for the composite image
    layer: Option<usize>,
    channel: &'a mut Channel,
    width: u32,
    height: u32,
}

impl DecodeJob<'_> {
    fn run(&mut self, depth: u16) -> Result<(), PsdError> {
        if !self.channel.is_stored() {
            let len = bytes_per_row(self.width, depth) * self.height as usize;
            self.channel.data = vec![0; len];
            return Ok(());
        }
        self.channel.decode(self.width, self.height, depth)
    }

    fn context(&self) -> String {
        match self.layer {
            Some(index) => format!("layer {} channel {}", index, self.channel.id),
            None => format!("composite channel {}", self.channel.id),
        }
    }
}

/// Decode every channel of the document, then fill in mask data
pub fn decode_channels(
    layers: &mut [Layer],
    composite: &mut CompositeImage,
    header: &PsdHeader,
    threads: usize,
) -> Result<(), PsdError> {
    let depth = header.depth;
    let mut jobs: Vec<DecodeJob<'_>> = Vec::new();

    for (index, layer) in layers.iter_mut().enumerate() {
        let rects: Vec<_> = layer
            .channels
            .iter()
            .map(|c| layer.channel_rect(c.id))
            .collect();
        for (channel, rect) in layer.channels.iter_mut().zip(rects) {
            jobs.push(DecodeJob {
                layer: Some(index),
                channel,
                width: rect.pixel_width(),
                height: rect.pixel_height(),
            });
        }
    }
    for channel in &mut composite.channels {
        jobs.push(DecodeJob {
            layer: None,
            channel,
            width: header.width,
            height: header.height,
        });
    }

    let job_count = jobs.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("psd-decode-{}", i))
        .build()
        .map_err(|e| PsdError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

    let results: Vec<Result<(), PsdError>> =
        pool.install(|| jobs.par_iter_mut().map(|job| job.run(depth)).collect());

    let failure = jobs
        .iter()
        .zip(results)
        .find_map(|(job, result)| result.err().map(|e| (job.context(), e)));
    drop(jobs);

    if let Some((context, err)) = failure {
        tracing::warn!("Channel decoding failed at {}: {}", context, err);
        return Err(match err {
            PsdError::BufferBounds(msg) => PsdError::BufferBounds(format!("{}: {}", context, msg)),
            other => other,
        });
    }

    for layer in layers.iter_mut() {
        layer.sync_mask_data();
    }

    tracing::debug!("Decoded {} channels on {} threads", job_count, threads.max(1));
    Ok(())
}
