//! CAPTCHA challenges, persisted through the store and served as a PNG
//! image or a WAV recording of touch tones.
use std::f32::consts::PI;
use std::io::Cursor;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use captcha::filters::{Dots, Noise, Wave};
use captcha::Captcha;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, instrument};

use super::Caller;
use crate::error::{AtlasError, Result};
use crate::store::NodeStore;

/// How long a challenge may be answered after issue.
pub const CAPTCHA_GRACE: Duration = Duration::from_secs(10 * 60);
const ID_LEN: usize = 20;
const SOLUTION_DIGITS: usize = 6;

const IMAGE_WIDTH: u32 = 240;
const IMAGE_HEIGHT: u32 = 80;

const SAMPLE_RATE: u32 = 8000;
const TONE_MS: u32 = 350;
const PAUSE_MS: u32 = 250;

/// A freshly issued challenge. Callers only ever see the ID; the
/// solution reaches them through [`CaptchaGate::render`].
#[derive(Clone, Debug)]
pub struct Challenge {
    pub id: String,
    pub solution: String,
}

/// How a challenge is presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeMedia {
    Image,
    Audio,
}

impl ChallengeMedia {
    /// Split a requested file name like `<id>.png` or `<id>.wav`.
    pub fn from_file_name(file: &str) -> Option<(&str, ChallengeMedia)> {
        let (id, extension) = file.rsplit_once('.')?;
        let media = match extension {
            "png" => ChallengeMedia::Image,
            "wav" => ChallengeMedia::Audio,
            _ => return None,
        };
        if id.is_empty() {
            return None;
        }
        Some((id, media))
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ChallengeMedia::Image => "image/png",
            ChallengeMedia::Audio => "audio/wav",
        }
    }
}

/// Digits the image font can draw. 0 and 1 are left out; they read too
/// much like letters once distorted.
fn solution_alphabet() -> &'static [char] {
    static ALPHABET: OnceLock<Vec<char>> = OnceLock::new();
    ALPHABET.get_or_init(|| {
        let supported = Captcha::new().supported_chars();
        let digits: Vec<char> = ('2'..='9').filter(|c| supported.contains(c)).collect();
        if digits.is_empty() {
            ('2'..='9').collect()
        } else {
            digits
        }
    })
}

#[derive(Clone, Debug)]
pub struct CaptchaGate {
    store: Arc<dyn NodeStore>,
}

impl CaptchaGate {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn issue(&self) -> Result<Challenge> {
        let (id, solution) = {
            let mut rng = OsRng;
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            let alphabet = solution_alphabet();
            let solution: String = (0..SOLUTION_DIGITS)
                .filter_map(|_| alphabet.choose(&mut rng).copied())
                .collect();
            (id, solution)
        };
        let expiration = Utc::now().timestamp() + CAPTCHA_GRACE.as_secs() as i64;
        self.store.insert_captcha(&id, &solution, expiration).await?;
        Ok(Challenge { id, solution })
    }

    /// Check a combined `id:solution` value. A correct answer consumes
    /// the challenge. Admin callers are not checked.
    #[instrument(skip(self, value), level = "debug")]
    pub async fn verify(&self, caller: &Caller, value: &str) -> Result<()> {
        if caller.is_admin {
            return Ok(());
        }
        let (id, answer) = value
            .split_once(':')
            .ok_or_else(|| validation_error!("invalid CAPTCHA format"))?;

        let now = Utc::now().timestamp();
        match self.store.take_captcha(id, now).await? {
            Some(solution) if solution == answer => Ok(()),
            Some(_) => {
                debug!("Incorrect CAPTCHA answer for {}", id);
                Err(policy_error!("incorrect CAPTCHA"))
            }
            None => Err(policy_error!("incorrect CAPTCHA")),
        }
    }

    /// Render a live challenge. Rendering does not consume it, so a
    /// caller may fetch both the image and the audio.
    pub async fn render(&self, id: &str, media: ChallengeMedia) -> Result<Vec<u8>> {
        let solution = self
            .store
            .peek_captcha(id, Utc::now().timestamp())
            .await?
            .ok_or_else(|| AtlasError::NotFound("no such CAPTCHA".to_string()))?;
        match media {
            ChallengeMedia::Image => render_image(&solution),
            ChallengeMedia::Audio => render_audio(&solution),
        }
    }

    pub async fn sweep_expired(&self) -> Result<usize> {
        self.store
            .delete_expired_captcha(Utc::now().timestamp())
            .await
    }
}

/// Draw `solution` as a distorted PNG.
pub fn render_image(solution: &str) -> Result<Vec<u8>> {
    let mut image = Captcha::new();
    let supported = image.supported_chars();
    for c in solution.chars() {
        if !supported.contains(&c) {
            return Err(AtlasError::Render(format!("font cannot draw {:?}", c)));
        }
        // One-letter alphabet so the next drawn character is exactly `c`
        image.set_chars(&[c]).add_char();
    }
    image
        .apply_filter(Noise::new(0.2))
        .apply_filter(Wave::new(2.0, 12.0).horizontal())
        .apply_filter(Dots::new(8))
        .view(IMAGE_WIDTH, IMAGE_HEIGHT);
    image
        .as_png()
        .ok_or_else(|| AtlasError::Render("PNG encoding failed".to_string()))
}

/// Row and column frequencies of a touch-tone key.
fn dtmf(digit: char) -> Option<(f32, f32)> {
    let pair = match digit {
        '1' => (697.0, 1209.0),
        '2' => (697.0, 1336.0),
        '3' => (697.0, 1477.0),
        '4' => (770.0, 1209.0),
        '5' => (770.0, 1336.0),
        '6' => (770.0, 1477.0),
        '7' => (852.0, 1209.0),
        '8' => (852.0, 1336.0),
        '9' => (852.0, 1477.0),
        '0' => (941.0, 1336.0),
        _ => return None,
    };
    Some(pair)
}

/// Play `solution` as touch tones in a mono 16-bit WAV.
pub fn render_audio(solution: &str) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let tone_samples = SAMPLE_RATE * TONE_MS / 1000;
    let pause_samples = SAMPLE_RATE * PAUSE_MS / 1000;
    let amplitude = f32::from(i16::MAX) * 0.4;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for digit in solution.chars() {
            let (low, high) = dtmf(digit)
                .ok_or_else(|| AtlasError::Render(format!("no tone for {:?}", digit)))?;
            for n in 0..tone_samples {
                let t = n as f32 / SAMPLE_RATE as f32;
                let sample = ((2.0 * PI * low * t).sin() + (2.0 * PI * high * t).sin()) / 2.0;
                writer.write_sample((sample * amplitude) as i16)?;
            }
            for _ in 0..pause_samples {
                writer.write_sample(0i16)?;
            }
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}
