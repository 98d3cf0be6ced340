//! Borrowed image views.

use crate::ResampleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PixelFormat {
    /// 8-bit luma.
    Y8,
    /// 32-bit pixels, blue in the lowest byte. Every byte is resampled.
    Xrgb8888,
}

impl PixelFormat {
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Y8 => 1,
            Self::Xrgb8888 => 4,
        }
    }
}

fn check(
    len: usize,
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
) -> Result<(), ResampleError> {
    if width == 0 || height == 0 {
        return Err(ResampleError::EmptyImage);
    }
    let row = width as usize * format.bytes_per_pixel();
    if pitch < row {
        return Err(ResampleError::PitchTooSmall { pitch, row });
    }
    let needed = pitch * (height as usize - 1) + row;
    if len < needed {
        return Err(ResampleError::BufferTooSmall { len, needed });
    }
    Ok(())
}

/// Read-only image. Row `y` starts at `y * pitch`.
#[derive(Debug, Clone, Copy)]
pub struct Pixmap<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
}

impl<'a> Pixmap<'a> {
    pub fn new(
        data: &'a [u8],
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<Self, ResampleError> {
        check(data.len(), width, height, pitch, format)?;
        Ok(Self {
            data,
            width,
            height,
            pitch,
            format,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pixel bytes of row `y`, without pitch padding.
    #[must_use]
    pub fn row(&self, y: u32) -> &'a [u8] {
        let start = y as usize * self.pitch;
        &self.data[start..start + self.width as usize * self.format.bytes_per_pixel()]
    }
}

/// Writable image. Only the `width * bpp` bytes of each row are touched.
#[derive(Debug)]
pub struct PixmapMut<'a> {
    data: &'a mut [u8],
    width: u32,
    height: u32,
    pitch: usize,
    format: PixelFormat,
}

impl<'a> PixmapMut<'a> {
    pub fn new(
        data: &'a mut [u8],
        width: u32,
        height: u32,
        pitch: usize,
        format: PixelFormat,
    ) -> Result<Self, ResampleError> {
        check(data.len(), width, height, pitch, format)?;
        Ok(Self {
            data,
            width,
            height,
            pitch,
            format,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.pitch;
        let len = self.width as usize * self.format.bytes_per_pixel();
        &mut self.data[start..start + len]
    }

    #[must_use]
    pub fn as_pixmap(&self) -> Pixmap<'_> {
        Pixmap {
            data: &*self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            format: self.format,
        }
    }
}
