use image::{imageops::FilterType, Rgba, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

const ICON_SIZE: u32 = 256;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=ui/app-window.slint");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR not set"));
    let icon = draw_clock_icon(ICON_SIZE);

    // Tray icon, embedded by main.rs via include_bytes!
    icon.save(out_dir.join("appicon.png")).expect("Failed to write appicon.png");

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("windows") {
        let ico_path = out_dir.join("app.ico");
        write_ico(&icon, &ico_path);

        let mut res = winres::WindowsResource::new();
        res.set_icon(ico_path.to_str().expect("non UTF-8 OUT_DIR"));
        res.compile().expect("Failed to compile Windows resources");
    }

    slint_build::compile("ui/app-window.slint").expect("Failed to compile app-window.slint");
}

/// Dark dial, light rim, hands at 10:10.
fn draw_clock_icon(size: u32) -> RgbaImage {
    let c = size as f32 / 2.0;
    let radius = c - 6.0;
    let rim = size as f32 * 0.06;
    let hand = |angle_deg: f32, len: f32| {
        let a = angle_deg.to_radians();
        (c + a.sin() * len, c - a.cos() * len)
    };
    let hour_tip = hand(300.0, radius * 0.5);
    let minute_tip = hand(60.0, radius * 0.75);

    RgbaImage::from_fn(size, size, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        let d = ((px - c).powi(2) + (py - c).powi(2)).sqrt();
        if d > radius {
            return Rgba([0, 0, 0, 0]);
        }
        let on_hand = segment_distance((px, py), (c, c), hour_tip) < size as f32 * 0.035
            || segment_distance((px, py), (c, c), minute_tip) < size as f32 * 0.025;
        if d > radius - rim || on_hand {
            Rgba([236, 239, 244, 255])
        } else {
            Rgba([27, 29, 34, 255])
        }
    })
}

fn segment_distance(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (abx, aby) = (b.0 - a.0, b.1 - a.1);
    let t = (((p.0 - a.0) * abx + (p.1 - a.1) * aby) / (abx * abx + aby * aby)).clamp(0.0, 1.0);
    let (qx, qy) = (a.0 + abx * t, a.1 + aby * t);
    ((p.0 - qx).powi(2) + (p.1 - qy).powi(2)).sqrt()
}

fn write_ico(icon: &RgbaImage, path: &Path) {
    let mut icon_dir = ico::IconDir::new(ico::ResourceType::Icon);
    for size in [16, 32, 48, 256] {
        let resized = image::imageops::resize(icon, size, size, FilterType::Lanczos3);
        let icon_image = ico::IconImage::from_rgba_data(size, size, resized.into_raw());
        icon_dir.add_entry(ico::IconDirEntry::encode(&icon_image).expect("Failed to encode ICO entry"));
    }
    let file = File::create(path).expect("Failed to create ICO file");
    icon_dir.write(BufWriter::new(file)).expect("Failed to write ICO");
}
