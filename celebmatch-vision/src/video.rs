use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Pixel formats the camera may hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    Rgb,
    Yuyv,
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(PixelFormat::Rgb),
            b"YUYV" => Some(PixelFormat::Yuyv),
            b"GREY" => Some(PixelFormat::Grey),
            _ => None,
        }
    }

    fn to_rgb(self, width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
        let pixels = (width * height) as usize;
        match self {
            PixelFormat::Rgb => {
                let need = pixels * 3;
                if data.len() < need {
                    anyhow::bail!("short RGB buffer: {} < {}", data.len(), need);
                }
                Ok(data[..need].to_vec())
            }
            PixelFormat::Yuyv => {
                if data.len() < pixels * 2 {
                    anyhow::bail!("short YUYV buffer: {} < {}", data.len(), pixels * 2);
                }
                let mut out = Vec::with_capacity(pixels * 3);
                for chunk in data[..pixels * 2].chunks_exact(4) {
                    let u = chunk[1] as f32 - 128.0;
                    let v = chunk[3] as f32 - 128.0;
                    for y in [chunk[0] as f32, chunk[2] as f32] {
                        out.push(to_u8(y + 1.402 * v));
                        out.push(to_u8(y - 0.344136 * u - 0.714136 * v));
                        out.push(to_u8(y + 1.772 * u));
                    }
                }
                Ok(out)
            }
            PixelFormat::Grey => {
                if data.len() < pixels {
                    anyhow::bail!("short GREY buffer: {} < {}", data.len(), pixels);
                }
                Ok(data[..pixels].iter().flat_map(|&y| [y, y, y]).collect())
            }
        }
    }
}

fn to_u8(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

/// V4L2 webcam used by the capture front-end.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("opening camera {}", device))?;
        let mut fmt = dev.format().context("reading camera format")?;

        for wanted in [b"RGB3", b"YUYV"] {
            if PixelFormat::from_fourcc(fmt.fourcc) == Some(PixelFormat::Rgb) {
                break;
            }
            let request = Format::new(fmt.width, fmt.height, FourCC::new(wanted));
            fmt = dev.set_format(&request).unwrap_or(fmt);
        }

        let format = PixelFormat::from_fourcc(fmt.fourcc)
            .ok_or_else(|| anyhow::anyhow!("unsupported pixel format {:?}", fmt.fourcc))?;
        log::info!("camera {}: {}x{} {:?}", device, fmt.width, fmt.height, format);

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("starting stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            format,
        })
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capturing frame")?;
        log::debug!("frame seq={} len={}", meta.sequence, data.len());
        let rgb = self.format.to_rgb(self.width, self.height, data)?;
        RgbImage::from_raw(self.width, self.height, rgb)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }

    /// Drop `warmup` frames so exposure settles, then return the next one.
    pub fn capture(&mut self, warmup: usize) -> Result<RgbImage> {
        for _ in 0..warmup {
            self.frame()?;
        }
        self.frame()
    }
}
