use crate::types::{DnSample, MultiBandProduct, OptramError, OptramResult, RasterElement};
use ndarray::Zip;

/// Applies the trailing quality band of a stack and removes it
#[derive(Debug, Clone, Copy)]
pub struct CloudMasker {
    nodata: DnSample,
}

impl Default for CloudMasker {
    fn default() -> Self {
        Self { nodata: 0 }
    }
}

impl CloudMasker {
    pub fn new(nodata: DnSample) -> Self {
        Self { nodata }
    }

    /// Overwrite every pixel flagged non-zero in the last band with nodata,
    /// then drop that band
    pub fn apply(&self, product: &MultiBandProduct) -> OptramResult<MultiBandProduct> {
        let (mask, bands) = product.bands.split_last().ok_or_else(|| {
            OptramError::Alignment(format!("{}: no quality band to apply", product.product_id))
        })?;
        if bands.is_empty() {
            return Err(OptramError::Alignment(format!(
                "{}: stack holds only the quality band",
                product.product_id
            )));
        }
        if !product.is_aligned() {
            return Err(OptramError::Alignment(format!(
                "{}: quality band is not on the reflectance grid",
                product.product_id
            )));
        }

        let mask_nodata = mask.nodata();
        let flagged = mask
            .data()
            .iter()
            .filter(|&&m| m != 0 && !m.is_nodata(mask_nodata))
            .count();
        log::info!(
            "Cloud masking {}: {} of {} pixels flagged",
            product.product_id,
            flagged,
            mask.pixel_count()
        );

        let nodata = self.nodata;
        let masked = bands
            .iter()
            .map(|band| {
                let band_nodata = band.nodata();
                let data = Zip::from(band.data())
                    .and(mask.data())
                    .map_collect(|&v, &m| {
                        if m != 0 || v.is_nodata(band_nodata) {
                            nodata
                        } else {
                            v
                        }
                    });
                band.derive(data, nodata)
            })
            .collect::<OptramResult<Vec<_>>>()?;

        Ok(product.with_bands(masked))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform, RasterBand};
    use chrono::NaiveDate;
    use ndarray::{array, Array2};

    fn band(data: Array2<i16>) -> RasterBand<i16> {
        RasterBand::new(data, GeoTransform::north_up(0.0, 20.0, 10.0, -10.0), Crs::epsg(32631), 0)
    }

    fn product(bands: Vec<RasterBand<i16>>) -> MultiBandProduct {
        MultiBandProduct {
            product_id: "TEST".to_string(),
            acquired: NaiveDate::from_ymd_opt(2016, 5, 8)
                .unwrap()
                .and_hms_opt(10, 40, 27)
                .unwrap(),
            cloud_cover: Some(10.0),
            bands,
        }
    }

    #[test]
    fn test_flagged_pixels_and_mask_band_removed() {
        let stack = product(vec![
            band(array![[100, 200], [300, 400]]),
            band(array![[500, 600], [700, 800]]),
            band(array![[0, 2], [0, 16]]),
        ]);

        let masked = CloudMasker::new(0).apply(&stack).unwrap();
        assert_eq!(masked.band_count(), 2);
        assert_eq!(*masked.bands[0].data(), array![[100, 0], [300, 0]]);
        assert_eq!(*masked.bands[1].data(), array![[500, 0], [700, 0]]);
    }

    #[test]
    fn test_clear_mask_is_identity() {
        let stack = product(vec![band(array![[1, 2], [3, 4]]), band(Array2::zeros((2, 2)))]);
        let masked = CloudMasker::default().apply(&stack).unwrap();
        assert_eq!(*masked.bands[0].data(), array![[1, 2], [3, 4]]);
    }

    #[test]
    fn test_mask_only_stack_rejected() {
        let stack = product(vec![band(Array2::zeros((2, 2)))]);
        assert!(CloudMasker::default().apply(&stack).is_err());
    }
}
