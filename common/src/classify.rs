//! Decodificación de imágenes y clasificación.
//!
//! El modelo real es una caja negra detrás de `Classifier`; acá vive un
//! clasificador de referencia por paleta de colores, determinista, que
//! permite correr el pipeline completo sin pesos de red neuronal.

use image::RgbImage;

use crate::task::Label;

/// Cantidad de etiquetas que devuelve la clasificación.
pub const TOP_K: usize = 5;

#[derive(Debug, thiserror::Error)]
#[error("no se pudo decodificar la imagen: {0}")]
pub struct DecodeError(pub String);

pub trait Decoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError>;
}

pub trait Classifier: Send + Sync {
    /// Devuelve como mucho `top_k` etiquetas ordenadas por confianza descendente.
    fn classify(&self, image: &RgbImage, top_k: usize) -> Vec<Label>;
}

/// Decoder basado en el crate `image` (detecta el formato por los bytes).
#[derive(Debug, Default, Clone)]
pub struct ImageDecoder;

impl Decoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbImage, DecodeError> {
        let img = image::load_from_memory(bytes).map_err(|e| DecodeError(e.to_string()))?;
        Ok(img.to_rgb8())
    }
}

/// Ordena por confianza descendente, recorta a [0, 1] y se queda con `top_k`.
pub fn rank(mut labels: Vec<Label>, top_k: usize) -> Vec<Label> {
    for l in labels.iter_mut() {
        l.confidence = if l.confidence.is_nan() {
            0.0
        } else {
            l.confidence.clamp(0.0, 1.0)
        };
    }
    labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    labels.truncate(top_k);
    labels
}

/// Clasificador de referencia: compara el color medio de la imagen contra
/// una paleta de etiquetas y aplica softmax sobre las distancias negativas.
#[derive(Debug, Clone)]
pub struct PaletteClassifier {
    palette: Vec<(String, [f64; 3])>,
    temperature: f64,
}

impl Default for PaletteClassifier {
    fn default() -> Self {
        let palette = [
            ("black", [0.0, 0.0, 0.0]),
            ("white", [255.0, 255.0, 255.0]),
            ("gray", [128.0, 128.0, 128.0]),
            ("red", [220.0, 30.0, 30.0]),
            ("orange", [240.0, 140.0, 20.0]),
            ("yellow", [235.0, 220.0, 40.0]),
            ("green", [40.0, 170.0, 60.0]),
            ("cyan", [40.0, 200.0, 210.0]),
            ("blue", [30.0, 60.0, 200.0]),
            ("purple", [130.0, 50.0, 170.0]),
            ("pink", [240.0, 150.0, 190.0]),
            ("brown", [120.0, 75.0, 40.0]),
        ];
        Self {
            palette: palette
                .into_iter()
                .map(|(name, rgb)| (name.to_string(), rgb))
                .collect(),
            temperature: 32.0,
        }
    }
}

impl PaletteClassifier {
    pub fn new(palette: Vec<(String, [f64; 3])>, temperature: f64) -> Self {
        Self {
            palette,
            temperature: if temperature > 0.0 { temperature } else { 1.0 },
        }
    }

    fn mean_color(image: &RgbImage) -> [f64; 3] {
        let n = (image.width() as u64 * image.height() as u64).max(1) as f64;
        let mut acc = [0.0_f64; 3];
        for px in image.pixels() {
            for (c, v) in acc.iter_mut().zip(px.0.iter()) {
                *c += *v as f64;
            }
        }
        acc.map(|c| c / n)
    }
}

impl Classifier for PaletteClassifier {
    fn classify(&self, image: &RgbImage, top_k: usize) -> Vec<Label> {
        if self.palette.is_empty() {
            return Vec::new();
        }

        let mean = Self::mean_color(image);
        let logits: Vec<f64> = self
            .palette
            .iter()
            .map(|(_, rgb)| {
                let dist = rgb
                    .iter()
                    .zip(mean.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                -dist / self.temperature
            })
            .collect();

        // softmax estable
        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let total: f64 = exps.iter().sum();

        let labels = self
            .palette
            .iter()
            .zip(exps)
            .map(|((name, _), e)| Label {
                label: name.clone(),
                confidence: e / total,
            })
            .collect();

        rank(labels, top_k)
    }
}
