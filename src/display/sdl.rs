//! SDL2 preview window

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Scancode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::{EventPump, Sdl};
use tracing::info;

use super::Preview;
use crate::capture::{decoder, Frame};
use crate::inference::DetectionResult;

/// Shows frames in a window; `q`, Escape or closing the window quits.
pub struct SdlPreview {
    _context: Sdl,
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    event_pump: EventPump,
    title: String,
    size: (u32, u32),
    quit: bool,
}

impl SdlPreview {
    pub fn new(title: &str) -> Result<Self> {
        let context = sdl2::init().map_err(|e| eyre!(e))?;
        let video_subsystem = context.video().map_err(|e| eyre!(e))?;

        let size = (640, 480);
        let window = video_subsystem
            .window(title, size.0, size.1)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();
        let event_pump = context.event_pump().map_err(|e| eyre!(e))?;

        Ok(Self {
            _context: context,
            canvas,
            texture_creator,
            event_pump,
            title: title.to_string(),
            size,
            quit: false,
        })
    }
}

impl Preview for SdlPreview {
    fn show(&mut self, frame: &Frame, results: &[DetectionResult]) -> Result<()> {
        let rgb = decoder::to_rgb(frame)?;

        if self.size != (rgb.width, rgb.height) {
            self.canvas
                .window_mut()
                .set_size(rgb.width, rgb.height)
                .map_err(|e| eyre!(e))?;
            self.size = (rgb.width, rgb.height);
        }

        let detections: usize = results.iter().map(|r| r.detections.len()).sum();
        self.canvas
            .window_mut()
            .set_title(&format!("{} - {} detections", self.title, detections))
            .map_err(|e| eyre!(e))?;

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, rgb.width, rgb.height)
            .map_err(|e| eyre!(e))?;
        texture
            .update(None, &rgb.data, (rgb.width * 3) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;
        self.canvas.present();
        Ok(())
    }

    fn quit_requested(&mut self) -> bool {
        for event in self.event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::KeyDown {
                    scancode: Some(Scancode::Q | Scancode::Escape),
                    ..
                } => {
                    info!("Quit requested from preview window");
                    self.quit = true;
                }
                _ => {}
            }
        }
        self.quit
    }

    fn close(&mut self) {
        self.canvas.window_mut().hide();
    }
}
