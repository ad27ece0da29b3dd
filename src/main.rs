// src/main.rs

//! Demo front end: opens a window, builds a canvas on it and animates a
//! test pattern. Clicking in the window logs the emulated pixel under the
//! pointer.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::mem;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use libc::{c_char, c_uint};
use x11::xlib;

use x11_canvas::{
    Canvas, CanvasRequest, FrameSource, Palette, Region, Rgb, Size, SizeHints, VideoConfig,
    XlibServer,
};

const SCREEN_WIDTH: u32 = 384;
const SCREEN_HEIGHT: u32 = 272;
const PAL_PIXEL_ASPECT: f64 = 0.9365;
const FRAME_DELAY: Duration = Duration::from_millis(20);

/// The classic 16-colour palette of a well-known 8-bit home computer.
const PALETTE: [(u8, u8, u8); 16] = [
    (0x00, 0x00, 0x00),
    (0xff, 0xff, 0xff),
    (0x68, 0x37, 0x2b),
    (0x70, 0xa4, 0xb2),
    (0x6f, 0x3d, 0x86),
    (0x58, 0x8d, 0x43),
    (0x35, 0x28, 0x79),
    (0xb8, 0xc7, 0x6f),
    (0x6f, 0x4f, 0x25),
    (0x43, 0x39, 0x00),
    (0x9a, 0x67, 0x59),
    (0x44, 0x44, 0x44),
    (0x6c, 0x6c, 0x6c),
    (0x9a, 0xd2, 0x84),
    (0x6c, 0x5e, 0xb5),
    (0x95, 0x95, 0x95),
];

/// The window the canvas draws into. Destroyed on drop, after the canvas.
struct DemoWindow {
    server: Rc<XlibServer>,
    id: xlib::Window,
    wm_protocols: xlib::Atom,
    wm_delete_window: xlib::Atom,
}

impl DemoWindow {
    fn new(server: Rc<XlibServer>, width: u32, height: u32) -> Result<Self> {
        let conn = server.connection();
        let display = conn.display();
        let id = unsafe {
            let mut attributes: xlib::XSetWindowAttributes = mem::zeroed();
            attributes.background_pixel = xlib::XBlackPixel(display, conn.screen());
            attributes.event_mask = xlib::ExposureMask
                | xlib::StructureNotifyMask
                | xlib::ButtonPressMask
                | xlib::KeyPressMask;
            xlib::XCreateWindow(
                display,
                conn.root(),
                0,
                0,
                width as c_uint,
                height as c_uint,
                0,
                conn.depth() as i32,
                xlib::InputOutput as c_uint,
                conn.visual(),
                xlib::CWBackPixel | xlib::CWEventMask,
                &mut attributes,
            )
        };
        if id == 0 {
            return Err(anyhow!("XCreateWindow failed"));
        }

        let (wm_protocols, wm_delete_window) = unsafe {
            let protocols = xlib::XInternAtom(display, b"WM_PROTOCOLS\0".as_ptr() as *const c_char, xlib::False);
            let delete = xlib::XInternAtom(display, b"WM_DELETE_WINDOW\0".as_ptr() as *const c_char, xlib::False);
            if protocols != 0 && delete != 0 {
                xlib::XSetWMProtocols(display, id, [delete].as_mut_ptr(), 1);
            } else {
                warn!("Failed to get WM_DELETE_WINDOW or WM_PROTOCOLS atom.");
            }
            xlib::XStoreName(display, id, b"x11-canvas\0".as_ptr() as *mut c_char);
            (protocols, delete)
        };
        debug!("Demo window {} created ({}x{})", id, width, height);

        Ok(Self {
            server,
            id,
            wm_protocols,
            wm_delete_window,
        })
    }

    fn apply_hints(&self, hints: &SizeHints) {
        let display = self.server.connection().display();
        unsafe {
            let mut size: xlib::XSizeHints = mem::zeroed();
            size.flags = xlib::PSize;
            size.width = hints.output_w as i32;
            size.height = hints.output_h as i32;
            if hints.min_aspect.is_some() && hints.max_aspect.is_some() {
                size.flags |= xlib::PAspect;
                size.min_aspect.x = hints.output_w as i32;
                size.min_aspect.y = hints.output_h as i32;
                size.max_aspect.x = hints.output_w as i32;
                size.max_aspect.y = hints.output_h as i32;
            }
            xlib::XSetWMNormalHints(display, self.id, &mut size);
            xlib::XResizeWindow(display, self.id, hints.output_w, hints.output_h);
        }
    }

    fn map(&self) {
        let display = self.server.connection().display();
        unsafe {
            xlib::XMapWindow(display, self.id);
            xlib::XFlush(display);
        }
    }
}

impl Drop for DemoWindow {
    fn drop(&mut self) {
        info!("Destroying demo window {}", self.id);
        unsafe { xlib::XDestroyWindow(self.server.connection().display(), self.id) };
    }
}

enum DemoEvent {
    Redraw,
    Resized(u32, u32),
    Click(i32, i32),
    Quit,
}

fn pending_events(window: &DemoWindow) -> Vec<DemoEvent> {
    let display = window.server.connection().display();
    let mut events = Vec::new();
    while unsafe { xlib::XPending(display) } > 0 {
        let mut xevent: xlib::XEvent = unsafe { mem::zeroed() };
        unsafe { xlib::XNextEvent(display, &mut xevent) };
        match xevent.get_type() {
            xlib::Expose => {
                let expose = unsafe { xevent.expose };
                if expose.count == 0 {
                    events.push(DemoEvent::Redraw);
                }
            }
            xlib::ConfigureNotify => {
                let configure = unsafe { xevent.configure };
                events.push(DemoEvent::Resized(configure.width as u32, configure.height as u32));
            }
            xlib::ButtonPress => {
                let button = unsafe { xevent.button };
                events.push(DemoEvent::Click(button.x, button.y));
            }
            xlib::KeyPress => events.push(DemoEvent::Quit),
            xlib::ClientMessage => {
                let message = unsafe { xevent.client_message };
                if message.message_type == window.wm_protocols
                    && message.data.get_long(0) as xlib::Atom == window.wm_delete_window
                {
                    info!("WM_DELETE_WINDOW received");
                    events.push(DemoEvent::Quit);
                }
            }
            _ => {}
        }
    }
    events
}

/// Diagonal colour bands that move one pixel per frame.
fn draw_pattern(pixels: &mut [u8], frame: u32) {
    for y in 0..SCREEN_HEIGHT {
        for x in 0..SCREEN_WIDTH {
            let band = (x + y + frame) / 24;
            pixels[(y * SCREEN_WIDTH + x) as usize] = (band % 16) as u8;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => VideoConfig::load(Path::new(&path))
            .with_context(|| format!("Failed to load video config from {}", path))?,
        None => VideoConfig::default(),
    };
    info!("Video configuration: {:?}", config);

    let server = Rc::new(XlibServer::open().context("Failed to open X display")?);
    let request = CanvasRequest::new(SCREEN_WIDTH, SCREEN_HEIGHT)
        .with_scale(2, 2)
        .with_pixel_aspect_ratio(PAL_PIXEL_ASPECT);
    let initial = request.scale.apply(request.size);

    let window = DemoWindow::new(server.clone(), initial.width, initial.height)
        .context("Failed to create demo window")?;
    let mut canvas = Canvas::create(server.clone(), window.id, request, config)
        .context("Cannot open canvas")?;
    window.apply_hints(&canvas.size_hints());
    canvas.set_palette(Palette::new(
        PALETTE.iter().map(|&(r, g, b)| Rgb::new(r, g, b)).collect(),
    ));
    window.map();

    let mut pixels = vec![0u8; (SCREEN_WIDTH * SCREEN_HEIGHT) as usize];
    let full = Region::full(Size::new(SCREEN_WIDTH, SCREEN_HEIGHT));
    let mut frame_no = 0u32;

    'running: loop {
        for event in pending_events(&window) {
            match event {
                DemoEvent::Redraw => debug!("Expose"),
                DemoEvent::Resized(w, h) => canvas.drawable_resized(w, h),
                DemoEvent::Click(x, y) => match canvas.presentation().to_source(x, y) {
                    Some((sx, sy)) => info!("Click at ({}, {}) hits emulated pixel ({}, {})", x, y, sx, sy),
                    None => info!("Click at ({}, {}) is outside the emulated screen", x, y),
                },
                DemoEvent::Quit => break 'running,
            }
        }

        draw_pattern(&mut pixels, frame_no);
        let frame = FrameSource::new(&pixels, SCREEN_WIDTH, SCREEN_HEIGHT)
            .ok_or_else(|| anyhow!("draw buffer too small"))?;
        if let Err(e) = canvas.refresh(&frame, full) {
            if !e.is_recoverable() {
                return Err(e).context("Refresh failed");
            }
        }
        frame_no = frame_no.wrapping_add(1);
        std::thread::sleep(FRAME_DELAY);
    }

    // The canvas has to let go of the drawable before the window goes away.
    canvas.destroy();
    drop(window);
    info!("x11-canvas demo exited successfully.");
    Ok(())
}
