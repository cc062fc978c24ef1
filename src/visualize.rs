use std::path::Path;

use image::{Rgb, RgbImage};
use tracing::info;

use crate::audio::{Peak, Spectrogram};

const PEAK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Log-magnitude range over the non-silent cells, never narrower than 1e-6.
fn log_magnitude_range(spectrogram: &Spectrogram) -> (f64, f64) {
    let mut min_log_mag = f64::MAX;
    let mut max_log_mag = f64::MIN;
    for time_slice in spectrogram.frames() {
        for &magnitude in time_slice {
            if magnitude < 1e-20 {
                continue;
            }
            let log_mag = (magnitude + 1e-20).log10();
            min_log_mag = min_log_mag.min(log_mag);
            max_log_mag = max_log_mag.max(log_mag);
        }
    }
    if min_log_mag > max_log_mag {
        return (0.0, 1.0);
    }
    let range = max_log_mag - min_log_mag;
    (min_log_mag, if range < 1e-6 { 1.0 } else { range })
}

/// Grayscale spectrogram (time on x, frequency upwards on y) with peaks
/// painted red.
pub fn spectrogram_image(spectrogram: &Spectrogram, peaks: &[Peak]) -> RgbImage {
    let width = spectrogram.num_frames() as u32;
    let height = spectrogram.freq_bins();
    let mut imgbuf = RgbImage::new(width, height as u32);
    if spectrogram.is_empty() {
        return imgbuf;
    }

    let (min_log_mag, log_mag_range) = log_magnitude_range(spectrogram);

    for (t, time_slice) in spectrogram.frames().iter().enumerate() {
        for (f, &magnitude) in time_slice.iter().enumerate() {
            let log_mag = (magnitude + 1e-20).log10();
            let scaled_val = (log_mag - min_log_mag) / log_mag_range;
            let intensity = (scaled_val.clamp(0.0, 1.0) * 255.0).round() as u8;
            let y = (height - 1 - f) as u32;
            imgbuf.put_pixel(t as u32, y, Rgb([intensity, intensity, intensity]));
        }
    }

    for peak in peaks {
        if peak.time < width as usize && peak.freq < height {
            let y = (height - 1 - peak.freq) as u32;
            imgbuf.put_pixel(peak.time as u32, y, PEAK_COLOR);
        }
    }
    imgbuf
}

pub fn save_spectrogram(
    spectrogram: &Spectrogram,
    peaks: &[Peak],
    output_path: impl AsRef<Path>,
) -> Result<(), image::ImageError> {
    let output_path = output_path.as_ref();
    spectrogram_image(spectrogram, peaks).save(output_path)?;
    info!(path = %output_path.display(), peaks = peaks.len(), "spectrogram saved");
    Ok(())
}
