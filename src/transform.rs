use image::{imageops, DynamicImage, GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use ndarray::Array4;
use rand::{seq::SliceRandom, Rng};

/// Edge length of the target crop and of every candidate tile.
pub const SLICE_SIZE: u32 = 200;
const TARGET_Y: u32 = 200;

const JITTER_STRENGTH: f32 = 0.5;

type Crop<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// ITU-R 601-2 luma with the same fixed-point rounding as PIL's "L" mode.
fn luma(rgb: &Rgb<u8>) -> u8 {
    let [r, g, b] = rgb.0;
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

pub fn to_luma(image: &DynamicImage) -> GrayImage {
    let rgb = image.to_rgb8();
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        Luma([luma(rgb.get_pixel(x, y))])
    })
}

/// Fixed-size crop; whatever falls outside the source stays zero.
fn crop_padded<P>(image: &Crop<P>, x: u32, y: u32) -> Crop<P>
where
    P: Pixel + 'static,
{
    let mut canvas = ImageBuffer::new(SLICE_SIZE, SLICE_SIZE);
    let visible = imageops::crop_imm(image, x, y, SLICE_SIZE, SLICE_SIZE).to_image();
    imageops::replace(&mut canvas, &visible, 0, 0);
    canvas
}

/// Target crop at `(0, 200)` and the `width / 200` candidate tiles along
/// the top strip. A remainder narrower than a tile is dropped.
pub fn slice_candidates<P>(image: &Crop<P>) -> (Crop<P>, Vec<Crop<P>>)
where
    P: Pixel + 'static,
{
    let target = crop_padded(image, 0, TARGET_Y);
    let candidates = (0..image.width() / SLICE_SIZE)
        .map(|i| crop_padded(image, i * SLICE_SIZE, 0))
        .collect();
    (target, candidates)
}

fn gray_to_tensor(image: &GrayImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut input = Array4::zeros((1, 1, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = (pixel.0[0] as f32) / 255.;
    }
    input
}

fn rgb_to_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut input = Array4::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }
    input
}

/// Interpolates from `degenerate` towards `value`, truncating to u8 the way
/// PIL's `ImageEnhance` blend does.
fn blend(degenerate: f32, value: f32, factor: f32) -> u8 {
    let mixed = degenerate + factor * (value - degenerate);
    mixed.trunc().clamp(0.0, 255.0) as u8
}

fn rgb_to_hsv(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max } else { 0.0 };
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (f32, f32, f32) {
    let sector = h * 6.0;
    let i = sector.floor();
    let f = sector - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    match (i as i32).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

#[derive(Debug, Clone, Copy)]
enum Adjustment {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

/// Random brightness, contrast, saturation and hue perturbation, applied in
/// a random order with fresh factors on every call.
#[derive(Debug, Clone, Copy)]
pub struct ColorJitter {
    brightness: f32,
    contrast: f32,
    saturation: f32,
    hue: f32,
}

impl Default for ColorJitter {
    fn default() -> Self {
        Self {
            brightness: JITTER_STRENGTH,
            contrast: JITTER_STRENGTH,
            saturation: JITTER_STRENGTH,
            hue: JITTER_STRENGTH,
        }
    }
}

impl ColorJitter {
    fn factor<R: Rng + ?Sized>(rng: &mut R, strength: f32) -> f32 {
        rng.random_range((1.0 - strength).max(0.0)..=1.0 + strength)
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: &RgbImage, rng: &mut R) -> RgbImage {
        let mut order = [
            Adjustment::Brightness,
            Adjustment::Contrast,
            Adjustment::Saturation,
            Adjustment::Hue,
        ];
        order.shuffle(rng);

        let brightness = Self::factor(rng, self.brightness);
        let contrast = Self::factor(rng, self.contrast);
        let saturation = Self::factor(rng, self.saturation);
        let hue = rng.random_range(-self.hue..=self.hue);

        let mut image = image.clone();
        for adjustment in order {
            match adjustment {
                Adjustment::Brightness => adjust_brightness(&mut image, brightness),
                Adjustment::Contrast => adjust_contrast(&mut image, contrast),
                Adjustment::Saturation => adjust_saturation(&mut image, saturation),
                Adjustment::Hue => adjust_hue(&mut image, hue),
            }
        }
        image
    }
}

fn adjust_brightness(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        pixel.apply(|c| blend(0.0, c as f32, factor));
    }
}

fn adjust_contrast(image: &mut RgbImage, factor: f32) {
    let pixels = (image.width() * image.height()).max(1) as f32;
    let total: f32 = image.pixels().map(|p| luma(p) as f32).sum();
    let mean = (total / pixels).round();
    for pixel in image.pixels_mut() {
        pixel.apply(|c| blend(mean, c as f32, factor));
    }
}

fn adjust_saturation(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        let gray = luma(pixel) as f32;
        pixel.apply(|c| blend(gray, c as f32, factor));
    }
}

fn adjust_hue(image: &mut RgbImage, shift: f32) {
    for pixel in image.pixels_mut() {
        let [r, g, b] = pixel.0.map(|c| c as f32 / 255.0);
        let (h, s, v) = rgb_to_hsv(r, g, b);
        let (r, g, b) = hsv_to_rgb((h + shift).rem_euclid(1.0), s, v);
        pixel.0 = [r, g, b].map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8);
    }
}

/// Normalized `(1, C, 200, 200)` tensors for the target and each candidate.
#[derive(Debug)]
pub struct SliceTensors {
    pub target: Array4<f32>,
    pub candidates: Vec<Array4<f32>>,
}

/// Preprocessing chosen from the model's channel count: luminance with no
/// augmentation for single-channel models, RGB with optional jitter otherwise.
#[derive(Debug, Clone)]
pub enum TransformPipeline {
    Luma,
    Rgb { jitter: Option<ColorJitter> },
}

pub fn build_transform(channels: i64, color_jitter: bool) -> TransformPipeline {
    if channels == 1 {
        TransformPipeline::Luma
    } else {
        TransformPipeline::Rgb {
            jitter: color_jitter.then(ColorJitter::default),
        }
    }
}

impl TransformPipeline {
    pub fn channels(&self) -> usize {
        match self {
            TransformPipeline::Luma => 1,
            TransformPipeline::Rgb { .. } => 3,
        }
    }

    fn rgb_tensor<R: Rng + ?Sized>(
        jitter: &Option<ColorJitter>,
        crop: &RgbImage,
        rng: &mut R,
    ) -> Array4<f32> {
        match jitter {
            Some(jitter) => rgb_to_tensor(&jitter.apply(crop, rng)),
            None => rgb_to_tensor(crop),
        }
    }

    pub fn apply<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> SliceTensors {
        match self {
            TransformPipeline::Luma => {
                let (target, candidates) = slice_candidates(&to_luma(image));
                SliceTensors {
                    target: gray_to_tensor(&target),
                    candidates: candidates.iter().map(gray_to_tensor).collect(),
                }
            }
            TransformPipeline::Rgb { jitter } => {
                let (target, candidates) = slice_candidates(&image.to_rgb8());
                let target = Self::rgb_tensor(jitter, &target, rng);
                let candidates = candidates
                    .iter()
                    .map(|crop| Self::rgb_tensor(jitter, crop, rng))
                    .collect();
                SliceTensors { target, candidates }
            }
        }
    }
}
