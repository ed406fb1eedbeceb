use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult};

use super::error::TiffStackError;

type TiffDecoder = Decoder<BufReader<File>>;

fn open_decoder(path: &Path) -> Result<TiffDecoder, TiffStackError> {
    Ok(Decoder::new(BufReader::new(File::open(path)?))?)
}

/// Convert the current page of the decoder into a (rows, columns) frame
fn decode_frame(decoder: &mut TiffDecoder, path: &Path) -> Result<Array2<u16>, TiffStackError> {
    let (width, height) = decoder.dimensions()?;
    let shape = (height as usize, width as usize);
    let pixels: Vec<u16> = match decoder.read_image()? {
        DecodingResult::U16(data) => data,
        DecodingResult::U8(data) => data.into_iter().map(u16::from).collect(),
        _ => return Err(TiffStackError::UnsupportedSampleFormat(path.to_path_buf())),
    };
    Array2::from_shape_vec(shape, pixels)
        .map_err(|_| TiffStackError::UnsupportedSampleFormat(path.to_path_buf()))
}

/// Read a single frame (page) out of a TIFF file
pub fn read_frame(path: &Path, index: usize) -> Result<Array2<u16>, TiffStackError> {
    let mut decoder = open_decoder(path)?;
    decoder
        .seek_to_image(index)
        .map_err(|_| TiffStackError::FrameOutOfRange(index, path.to_path_buf()))?;
    decode_frame(&mut decoder, path)
}

/// Find which file of a stack holds a frame, given the first frame of every file.
///
/// Returns (file index, frame within that file).
pub fn locate_frame(starting_frames: &[u64], index: usize) -> Option<(usize, usize)> {
    let index = index as u64;
    starting_frames
        .iter()
        .rposition(|start| *start <= index)
        .map(|file| (file, (index - starting_frames[file]) as usize))
}

/// Count the pages of a TIFF file
fn count_frames(path: &Path) -> Result<usize, TiffStackError> {
    let mut decoder = open_decoder(path)?;
    let mut n_frames = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        n_frames += 1;
    }
    Ok(n_frames)
}

/// The two-photon acquisition is split over several multi-page TIFF files.
///
/// The stack is the ordered collection of those files, treated as one continuous sequence of
/// frames.
#[derive(Debug, Clone)]
pub struct TiffStack {
    paths: Vec<PathBuf>,
    frame_counts: Vec<usize>,
    dimensions: (usize, usize),
}

impl TiffStack {
    /// Create a stack, reading the page count of every file. All pages must share a shape
    pub fn new(paths: &[PathBuf]) -> Result<Self, TiffStackError> {
        let first = paths.first().ok_or(TiffStackError::NoFiles)?;
        let dimensions = {
            let mut decoder = open_decoder(first)?;
            let (width, height) = decoder.dimensions()?;
            (height as usize, width as usize)
        };
        let mut frame_counts = Vec::with_capacity(paths.len());
        for path in paths.iter() {
            let mut decoder = open_decoder(path)?;
            let (width, height) = decoder.dimensions()?;
            let found = (height as usize, width as usize);
            if found != dimensions {
                return Err(TiffStackError::MismatchedDimensions {
                    path: path.clone(),
                    found,
                    expected: dimensions,
                });
            }
            frame_counts.push(count_frames(path)?);
            log::info!(
                "Found {} frames in {} ({})",
                frame_counts.last().unwrap_or(&0),
                path.display(),
                human_bytes::human_bytes(path.metadata()?.len() as f64)
            );
        }
        Ok(Self {
            paths: paths.to_vec(),
            frame_counts,
            dimensions,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn frame_counts(&self) -> &[usize] {
        &self.frame_counts
    }

    /// The index of the first frame of each file within the whole stack
    pub fn starting_frames(&self) -> Vec<u64> {
        let mut starts = Vec::with_capacity(self.frame_counts.len());
        let mut total: u64 = 0;
        for count in self.frame_counts.iter() {
            starts.push(total);
            total += *count as u64;
        }
        starts
    }

    pub fn total_frames(&self) -> usize {
        self.frame_counts.iter().sum()
    }

    /// (rows, columns) of every frame
    pub fn dimensions(&self) -> (usize, usize) {
        self.dimensions
    }

    /// Iterate over every frame of every file, in order
    pub fn frames(&self) -> FrameIter {
        FrameIter {
            pending: self.paths.iter().cloned().collect(),
            active: None,
        }
    }
}

/// Iterator over the frames of a TiffStack. Only one file is open at a time.
pub struct FrameIter {
    pending: VecDeque<PathBuf>,
    active: Option<(TiffDecoder, PathBuf, bool)>,
}

impl FrameIter {
    fn next_frame(&mut self) -> Result<Option<Array2<u16>>, TiffStackError> {
        loop {
            if let Some((decoder, path, first)) = self.active.as_mut() {
                if *first {
                    *first = false;
                    return Ok(Some(decode_frame(decoder, path)?));
                }
                if decoder.more_images() {
                    decoder.next_image()?;
                    return Ok(Some(decode_frame(decoder, path)?));
                }
                self.active = None;
            }
            match self.pending.pop_front() {
                Some(path) => self.active = Some((open_decoder(&path)?, path, true)),
                None => return Ok(None),
            }
        }
    }
}

impl Iterator for FrameIter {
    type Item = Result<Array2<u16>, TiffStackError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.pending.clear();
                self.active = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    /// Write an n_frames stack of (height, width) frames where every pixel of frame k is offset + k
    pub(crate) fn write_tiff(path: &Path, n_frames: usize, height: u32, width: u32, offset: u16) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        for k in 0..n_frames {
            let data = vec![offset + k as u16; (height * width) as usize];
            encoder
                .write_image::<colortype::Gray16>(width, height, &data)
                .unwrap();
        }
    }

    #[test]
    fn test_stack_counts_and_frames() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("cell_0001_2.tif");
        let b = dir.path().join("cell_0002_2.tif");
        write_tiff(&a, 3, 4, 5, 0);
        write_tiff(&b, 2, 4, 5, 100);

        let stack = TiffStack::new(&[a.clone(), b]).unwrap();
        assert_eq!(stack.frame_counts(), &[3, 2]);
        assert_eq!(stack.starting_frames(), vec![0, 3]);
        assert_eq!(stack.total_frames(), 5);
        assert_eq!(stack.dimensions(), (4, 5));

        let firsts: Vec<u16> = stack.frames().map(|f| f.unwrap()[[0, 0]]).collect();
        assert_eq!(firsts, vec![0, 1, 2, 100, 101]);

        assert_eq!(read_frame(&a, 2).unwrap()[[3, 4]], 2);
        assert!(read_frame(&a, 7).is_err());
    }

    #[test]
    fn test_mismatched_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tif");
        let b = dir.path().join("b.tif");
        write_tiff(&a, 1, 4, 4, 0);
        write_tiff(&b, 1, 8, 4, 0);
        assert!(matches!(
            TiffStack::new(&[a, b]),
            Err(TiffStackError::MismatchedDimensions { .. })
        ));
    }

    #[test]
    fn test_locate_frame() {
        assert_eq!(locate_frame(&[0, 3], 0), Some((0, 0)));
        assert_eq!(locate_frame(&[0, 3], 4), Some((1, 1)));
        assert_eq!(locate_frame(&[2], 1), None);
        assert_eq!(locate_frame(&[], 0), None);
    }

    #[test]
    fn test_empty_stack() {
        assert!(matches!(TiffStack::new(&[]), Err(TiffStackError::NoFiles)));
    }
}
