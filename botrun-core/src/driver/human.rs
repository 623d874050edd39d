use std::time::Duration;

use chromiumoxide::element::Element;
use chromiumoxide::layout::Point;
use chromiumoxide::page::Page;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

use crate::config::HumanSection;

use super::error::{BrowserError, BrowserResult};

const KEY_ROWS: [&str; 3] = ["qwertyuiop", "asdfghjkl", "zxcvbnm"];

/// Human-looking pointer motion and typing for the Chromium driver.
#[derive(Debug)]
pub struct HumanPacer {
    config: HumanSection,
    last_point: Option<Point>,
    rng: StdRng,
}

impl HumanPacer {
    pub fn new(config: HumanSection) -> Self {
        Self {
            config,
            last_point: None,
            rng: StdRng::from_entropy(),
        }
    }

    pub async fn click_element(&mut self, page: &Page, element: &Element) -> BrowserResult<()> {
        self.move_to_element(page, element).await?;
        let hesitation = self.random_duration(self.config.click_hesitation_ms);
        sleep(hesitation).await;
        element
            .click()
            .await
            .map_err(|err| BrowserError::Unexpected(format!("failed to click element: {err}")))?;
        Ok(())
    }

    /// Types `text` one character at a time, occasionally hitting a
    /// neighbouring key and correcting it with backspace.
    pub async fn type_text(&mut self, element: &Element, text: &str) -> BrowserResult<()> {
        element.click().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to focus element before typing: {err}"))
        })?;
        for ch in text.chars() {
            if self.rng.gen_bool(self.config.typo_chance.clamp(0.0, 1.0)) {
                if let Some(typo) = neighbour_key(ch, &mut self.rng) {
                    element.type_str(typo.to_string()).await.map_err(|err| {
                        BrowserError::Unexpected(format!("failed to type character: {err}"))
                    })?;
                    sleep(self.random_duration(self.config.typo_correction_ms)).await;
                    element.press_key("Backspace").await.map_err(|err| {
                        BrowserError::Unexpected(format!("failed to correct typo: {err}"))
                    })?;
                    sleep(self.random_duration(self.config.typing_delay_ms)).await;
                }
            }
            element.type_str(ch.to_string()).await.map_err(|err| {
                BrowserError::Unexpected(format!("failed to type character: {err}"))
            })?;
            sleep(self.random_duration(self.config.typing_delay_ms)).await;
        }
        Ok(())
    }

    async fn move_to_element(&mut self, page: &Page, element: &Element) -> BrowserResult<()> {
        let bbox = element.bounding_box().await.map_err(|err| {
            BrowserError::Unexpected(format!("failed to get element bounding box: {err}"))
        })?;
        let jitter = self.config.mouse_jitter_px as f64;
        let target = Point::new(
            bbox.x + self.rng.gen_range(0.3..0.7) * bbox.width + self.random_offset(jitter),
            bbox.y + self.rng.gen_range(0.2..0.6) * bbox.height + self.random_offset(jitter),
        );
        for (point, delay) in self.plan_motion(target) {
            page.move_mouse(point)
                .await
                .map_err(|err| BrowserError::Unexpected(format!("failed to move mouse: {err}")))?;
            sleep(delay).await;
        }
        self.last_point = Some(target);
        Ok(())
    }

    fn plan_motion(&mut self, target: Point) -> Vec<(Point, Duration)> {
        let start = self.last_point.unwrap_or_else(|| Point::new(0.0, 0.0));
        let distance = ((target.x - start.x).powi(2) + (target.y - start.y).powi(2)).sqrt();
        let [low, high] = ordered(self.config.mouse_speed_px_s);
        let speed = self.rng.gen_range(low..=high).max(1) as f64;
        let duration_secs = (distance / speed).max(0.08);
        let steps = (duration_secs * 60.0).clamp(12.0, 48.0) as usize;
        let delay = Duration::from_secs_f64(duration_secs / steps as f64);
        (1..=steps)
            .map(|idx| {
                let eased = ease_in_out_cubic(idx as f64 / steps as f64);
                let point = Point::new(
                    start.x + (target.x - start.x) * eased + self.random_offset(1.2),
                    start.y + (target.y - start.y) * eased + self.random_offset(1.2),
                );
                (point, delay)
            })
            .collect()
    }

    fn random_duration(&mut self, bounds: [u32; 2]) -> Duration {
        let [low, high] = ordered(bounds);
        Duration::from_millis(self.rng.gen_range(low..=high) as u64)
    }

    fn random_offset(&mut self, max: f64) -> f64 {
        if max <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(-max..=max)
    }
}

fn ordered(bounds: [u32; 2]) -> [u32; 2] {
    [bounds[0].min(bounds[1]), bounds[0].max(bounds[1])]
}

fn ease_in_out_cubic(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn neighbour_key<R: Rng>(ch: char, rng: &mut R) -> Option<char> {
    if let Some(digit) = ch.to_digit(10) {
        let shifted = if rng.gen_bool(0.5) {
            (digit + 1) % 10
        } else {
            (digit + 9) % 10
        };
        return char::from_digit(shifted, 10);
    }
    let lower = ch.to_ascii_lowercase();
    let row = KEY_ROWS.iter().find(|row| row.contains(lower))?;
    let keys: Vec<char> = row.chars().collect();
    let index = keys.iter().position(|key| *key == lower)?;
    let candidates: Vec<char> = [index.checked_sub(1), Some(index + 1)]
        .into_iter()
        .flatten()
        .filter_map(|idx| keys.get(idx).copied())
        .collect();
    let picked = candidates[rng.gen_range(0..candidates.len())];
    Some(if ch.is_ascii_uppercase() {
        picked.to_ascii_uppercase()
    } else {
        picked
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neighbour_keys_stay_on_the_same_row() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let typo = neighbour_key('s', &mut rng).unwrap();
            assert!(typo == 'a' || typo == 'd');
            let upper = neighbour_key('Q', &mut rng).unwrap();
            assert_eq!(upper, 'W');
        }
    }

    #[test]
    fn digits_shift_by_one() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..16 {
            let typo = neighbour_key('0', &mut rng).unwrap();
            assert!(typo == '1' || typo == '9');
        }
    }

    #[test]
    fn punctuation_has_no_typo() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(neighbour_key('@', &mut rng), None);
    }

    #[test]
    fn easing_is_anchored() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
    }
}
