fn main() {
    // Image loading/saving is outside scope of this library
    let width = 10;
    let height = 10;
    let fakebitmap: Vec<u8> = (0..width * height).flat_map(|i| [(i * 25) as u8, 128, 255 - (i * 2) as u8, 255]).collect();

    // Configure the library
    let mut liq = palettequant::new();
    liq.set_speed(5).unwrap();
    liq.set_quality(70, 99).unwrap();
    liq.set_log_callback(|_, msg| println!("{msg}"));

    // Describe the bitmap
    let img = liq.new_image_rgba8(&fakebitmap, width, height, 0.0).unwrap();

    // The magic happens in quantize()
    let mut res = match liq.quantize(&img) {
        Ok(res) => res,
        Err(err) => panic!("Quantization failed, because: {err}"),
    };

    // Enable dithering for subsequent remappings
    res.set_dithering_level(1.0).unwrap();

    // You can reuse the result to generate several images with the same palette
    let (palette, pixels) = res.remapped(&img).unwrap();

    println!(
        "Done! Got palette of {} colors and {} pixels with {}% quality",
        palette.count(),
        pixels.len(),
        res.remapping_quality().unwrap_or(0)
    );

    // The result only borrows the image weakly
    img.release();
    match res.write_remapped_image() {
        Err(err) => println!("After release: {err}"),
        Ok(_) => unreachable!(),
    }
    println!("palettequant {}", palettequant::version_string());
}
