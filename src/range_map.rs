/// Reescala `value` de [src_min, src_max] a [dst_min, dst_max] y satura el
/// resultado dentro del rango destino.
///
/// Si el rango origen está vacío (`src_min == src_max`) devuelve `dst_min`.
/// Valores fuera del rango origen se saturan; rangos invertidos se interpolan
/// igual (un sensor montado al revés).
pub fn map(value: i32, src_min: i32, src_max: i32, dst_min: i32, dst_max: i32) -> i32 {
    if src_min == src_max {
        return dst_min;
    }

    let span_src = f64::from(src_max) - f64::from(src_min);
    let span_dst = f64::from(dst_max) - f64::from(dst_min);
    let scaled = f64::from(dst_min) + (f64::from(value) - f64::from(src_min)) * span_dst / span_src;

    let (lo, hi) = if dst_min <= dst_max {
        (dst_min, dst_max)
    } else {
        (dst_max, dst_min)
    };

    // round() redondea .5 alejándose de cero: 127.5 → 128
    scaled.round().clamp(f64::from(lo), f64::from(hi)) as i32
}
