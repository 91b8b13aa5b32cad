//! WGS84 lon/lat → British National Grid.
//!
//! Listing exports carry WGS84 coordinates while ONS/London Datastore boundary
//! files are usually in EPSG:27700. The conversion is the Ordnance Survey
//! recipe:
//!
//! 1. geodetic → cartesian on the GRS80/WGS84 ellipsoid
//! 2. 7-parameter Helmert shift WGS84 → OSGB36
//! 3. cartesian → geodetic on the Airy 1830 ellipsoid
//! 4. Transverse Mercator with the National Grid origin
//!
//! Accuracy is a few metres (the Helmert shift is the limiting factor), which
//! is fine for assigning listings to polygons.

use geo::Point;

use crate::domain::Crs;

struct Ellipsoid {
    a: f64,
    b: f64,
}

const WGS84: Ellipsoid = Ellipsoid {
    a: 6_378_137.000,
    b: 6_356_752.314_245,
};

const AIRY_1830: Ellipsoid = Ellipsoid {
    a: 6_377_563.396,
    b: 6_356_256.909,
};

// Helmert WGS84 → OSGB36 (metres, arc-seconds, ppm).
const TX: f64 = -446.448;
const TY: f64 = 125.157;
const TZ: f64 = -542.060;
const RX_SEC: f64 = -0.1502;
const RY_SEC: f64 = -0.2470;
const RZ_SEC: f64 = -0.8421;
const S_PPM: f64 = 20.4894;

// National Grid projection constants.
const F0: f64 = 0.999_601_271_7;
const LAT0_DEG: f64 = 49.0;
const LON0_DEG: f64 = -2.0;
const N0: f64 = -100_000.0;
const E0: f64 = 400_000.0;

/// Convert a point between supported CRSs.
///
/// Only the WGS84 → BNG direction is supported; other requests are identity
/// when source and target match and `None` otherwise.
pub fn reproject(point: Point<f64>, from: Crs, to: Crs) -> Option<Point<f64>> {
    match (from, to) {
        (a, b) if a == b => Some(point),
        (Crs::Wgs84, Crs::Bng) => {
            let (e, n) = wgs84_to_bng(point.x(), point.y());
            Some(Point::new(e, n))
        }
        _ => None,
    }
}

/// WGS84 longitude/latitude (degrees) to BNG easting/northing (metres).
pub fn wgs84_to_bng(lon_deg: f64, lat_deg: f64) -> (f64, f64) {
    let (x, y, z) = geodetic_to_cartesian(lat_deg.to_radians(), lon_deg.to_radians(), &WGS84);
    let (x, y, z) = helmert_wgs84_to_osgb36(x, y, z);
    let (lat, lon) = cartesian_to_geodetic(x, y, z, &AIRY_1830);
    osgb36_to_grid(lat, lon)
}

fn geodetic_to_cartesian(lat: f64, lon: f64, ell: &Ellipsoid) -> (f64, f64, f64) {
    let e2 = 1.0 - (ell.b * ell.b) / (ell.a * ell.a);
    let nu = ell.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
    (
        nu * lat.cos() * lon.cos(),
        nu * lat.cos() * lon.sin(),
        (1.0 - e2) * nu * lat.sin(),
    )
}

fn helmert_wgs84_to_osgb36(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let sec = (1.0_f64 / 3600.0).to_radians();
    let (rx, ry, rz) = (RX_SEC * sec, RY_SEC * sec, RZ_SEC * sec);
    let s1 = 1.0 + S_PPM * 1e-6;
    (
        TX + x * s1 - y * rz + z * ry,
        TY + x * rz + y * s1 - z * rx,
        TZ - x * ry + y * rx + z * s1,
    )
}

fn cartesian_to_geodetic(x: f64, y: f64, z: f64, ell: &Ellipsoid) -> (f64, f64) {
    let e2 = 1.0 - (ell.b * ell.b) / (ell.a * ell.a);
    let p = (x * x + y * y).sqrt();
    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..10 {
        let nu = ell.a / (1.0 - e2 * lat.sin().powi(2)).sqrt();
        let next = (z + e2 * nu * lat.sin()).atan2(p);
        if (next - lat).abs() < 1e-12 {
            lat = next;
            break;
        }
        lat = next;
    }
    (lat, y.atan2(x))
}

/// OSGB36 latitude/longitude (radians) to National Grid easting/northing.
pub fn osgb36_to_grid(lat: f64, lon: f64) -> (f64, f64) {
    let a = AIRY_1830.a;
    let b = AIRY_1830.b;
    let lat0 = LAT0_DEG.to_radians();
    let lon0 = LON0_DEG.to_radians();

    let e2 = 1.0 - (b * b) / (a * a);
    let n = (a - b) / (a + b);
    let n2 = n * n;
    let n3 = n2 * n;

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let nu = a * F0 / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let rho = a * F0 * (1.0 - e2) / (1.0 - e2 * sin_lat * sin_lat).powf(1.5);
    let eta2 = nu / rho - 1.0;

    let dlat = lat - lat0;
    let slat = lat + lat0;
    let ma = (1.0 + n + 1.25 * n2 + 1.25 * n3) * dlat;
    let mb = (3.0 * n + 3.0 * n2 + 2.625 * n3) * dlat.sin() * slat.cos();
    let mc = (1.875 * n2 + 1.875 * n3) * (2.0 * dlat).sin() * (2.0 * slat).cos();
    let md = (35.0 / 24.0) * n3 * (3.0 * dlat).sin() * (3.0 * slat).cos();
    let m = b * F0 * (ma - mb + mc - md);

    let cos3 = cos_lat.powi(3);
    let cos5 = cos_lat.powi(5);
    let tan2 = tan_lat * tan_lat;
    let tan4 = tan2 * tan2;

    let i = m + N0;
    let ii = (nu / 2.0) * sin_lat * cos_lat;
    let iii = (nu / 24.0) * sin_lat * cos3 * (5.0 - tan2 + 9.0 * eta2);
    let iiia = (nu / 720.0) * sin_lat * cos5 * (61.0 - 58.0 * tan2 + tan4);
    let iv = nu * cos_lat;
    let v = (nu / 6.0) * cos3 * (nu / rho - tan2);
    let vi = (nu / 120.0) * cos5 * (5.0 - 18.0 * tan2 + tan4 + 14.0 * eta2 - 58.0 * tan2 * eta2);

    let dl = lon - lon0;
    let northing = i + ii * dl.powi(2) + iii * dl.powi(4) + iiia * dl.powi(6);
    let easting = E0 + iv * dl + v * dl.powi(3) + vi * dl.powi(5);
    (easting, northing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dms(d: f64, m: f64, s: f64) -> f64 {
        (d + m / 60.0 + s / 3600.0).to_radians()
    }

    #[test]
    fn ordnance_survey_worked_example() {
        // OS "A guide to coordinate systems in Great Britain", worked example C.1.
        let (e, n) = osgb36_to_grid(dms(52.0, 39.0, 27.2531), dms(1.0, 43.0, 4.5177));
        assert!((e - 651_409.903).abs() < 0.01, "easting {e}");
        assert!((n - 313_177.270).abs() < 0.01, "northing {n}");
    }

    #[test]
    fn nelsons_column_grid_reference() {
        // Nelson's Column, Trafalgar Square: 51.50775N 0.12795W.
        let (e, n) = wgs84_to_bng(-0.127_95, 51.507_75);
        assert!((e - 530_017.0).abs() < 10.0, "easting {e}");
        assert!((n - 180_419.0).abs() < 10.0, "northing {n}");
    }

    #[test]
    fn greenwich_sits_on_the_airy_meridian() {
        // Airy Transit Circle. WGS84 puts it 5.31" west of the IERS meridian;
        // on OSGB36 it defines longitude zero.
        let lat = 51.477_811;
        let (e, n) = wgs84_to_bng(-0.001_475, lat);
        let (x, y, z) = geodetic_to_cartesian(lat.to_radians(), (-0.001_475_f64).to_radians(), &WGS84);
        let (x, y, z) = helmert_wgs84_to_osgb36(x, y, z);
        let (osgb_lat, osgb_lon) = cartesian_to_geodetic(x, y, z, &AIRY_1830);
        let (meridian_e, meridian_n) = osgb36_to_grid(osgb_lat, 0.0);
        assert!(osgb_lon.to_degrees().abs() < 0.000_2, "longitude {}", osgb_lon.to_degrees());
        assert!((e - meridian_e).abs() < 12.0, "easting {e} vs {meridian_e}");
        assert!((n - meridian_n).abs() < 1.0, "northing {n}");
        assert!((e - 538_885.0).abs() < 10.0, "easting {e}");
        assert!((n - 177_321.0).abs() < 10.0, "northing {n}");
    }

    #[test]
    fn reproject_identity_and_unsupported() {
        let p = Point::new(1.0, 2.0);
        assert_eq!(reproject(p, Crs::Bng, Crs::Bng), Some(p));
        assert!(reproject(p, Crs::Bng, Crs::Wgs84).is_none());
    }
}
