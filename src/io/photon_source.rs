use crate::types::{BathyError, BathyResult, Beam, BeamMetadata, PhotonRecord};
use std::collections::BTreeMap;

/// Validated photon sequence of one beam, in acquisition order
#[derive(Debug, Clone)]
pub struct BeamPhotons {
    metadata: BeamMetadata,
    photons: Vec<PhotonRecord>,
}

impl BeamPhotons {
    /// Wrap a beam's photons, rejecting sequences whose `delta_time` is not strictly increasing
    pub fn new(metadata: BeamMetadata, photons: Vec<PhotonRecord>) -> BathyResult<Self> {
        if let Some(pos) = photons
            .windows(2)
            .position(|w| !(w[1].delta_time > w[0].delta_time))
        {
            return Err(BathyError::InvalidInput(format!(
                "{}/{}: delta_time not strictly increasing at photon {}",
                metadata.granule_id,
                metadata.beam,
                pos + 1
            )));
        }
        Ok(Self { metadata, photons })
    }

    pub fn metadata(&self) -> &BeamMetadata {
        &self.metadata
    }

    pub fn photons(&self) -> &[PhotonRecord] {
        &self.photons
    }

    pub fn len(&self) -> usize {
        self.photons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photons.is_empty()
    }
}

/// Source of decoded photon data for one granule.
///
/// `load_beam` returns `Ok(None)` when the granule does not contain the beam.
pub trait PhotonSource: Send + Sync {
    fn granule_id(&self) -> &str;

    /// Beams advertised by the granule
    fn beams(&self) -> Vec<Beam>;

    fn load_beam(&self, beam: Beam) -> BathyResult<Option<BeamPhotons>>;
}

impl<T: PhotonSource + ?Sized> PhotonSource for Box<T> {
    fn granule_id(&self) -> &str {
        (**self).granule_id()
    }

    fn beams(&self) -> Vec<Beam> {
        (**self).beams()
    }

    fn load_beam(&self, beam: Beam) -> BathyResult<Option<BeamPhotons>> {
        (**self).load_beam(beam)
    }
}

/// Granule whose beams are already decoded in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryGranule {
    id: String,
    beams: BTreeMap<Beam, BeamPhotons>,
}

impl InMemoryGranule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            beams: BTreeMap::new(),
        }
    }

    pub fn with_beam(mut self, photons: BeamPhotons) -> Self {
        self.beams.insert(photons.metadata().beam, photons);
        self
    }
}

impl PhotonSource for InMemoryGranule {
    fn granule_id(&self) -> &str {
        &self.id
    }

    fn beams(&self) -> Vec<Beam> {
        self.beams.keys().copied().collect()
    }

    fn load_beam(&self, beam: Beam) -> BathyResult<Option<BeamPhotons>> {
        Ok(self.beams.get(&beam).cloned())
    }
}

/// Photon-rate arrays of one beam as stored in the `heights` group
#[derive(Debug, Clone, Default)]
pub struct RawPhotonArrays {
    pub lon_ph: Vec<f64>,
    pub lat_ph: Vec<f64>,
    pub h_ph: Vec<f64>,
    pub delta_time: Vec<f64>,
    pub ocean_conf: Vec<i8>,
    pub land_conf: Vec<i8>,
}

/// Segment-rate (20 m) geophysical and geolocation variables of one beam
#[derive(Debug, Clone, Default)]
pub struct SegmentArrays {
    pub delta_time: Vec<f64>,
    pub geoid: Vec<f64>,
    pub geoid_free2mean: Vec<f64>,
    pub tide_ocean: Vec<f64>,
    pub dac: Vec<f64>,
    pub ref_azimuth: Vec<f64>,
    pub ref_elev: Vec<f64>,
    pub segment_ph_cnt: Vec<i32>,
}

/// For each photon time, the index of the last segment starting at or before it.
///
/// Photons before the first segment take the first segment. `segment_times` must be sorted.
pub fn asof_indices(photon_times: &[f64], segment_times: &[f64]) -> Vec<Option<usize>> {
    if segment_times.is_empty() {
        return vec![None; photon_times.len()];
    }
    photon_times
        .iter()
        .map(|&t| {
            let upper = segment_times.partition_point(|&s| s <= t);
            Some(upper.saturating_sub(1))
        })
        .collect()
}

/// Build photon records from raw arrays, resolving segment corrections by last-known value
/// and referencing heights to the geoid (`z_geoid = h_ph - (geoid + free2mean + tide)`).
pub fn build_photon_records(
    raw: &RawPhotonArrays,
    segments: &SegmentArrays,
) -> BathyResult<Vec<PhotonRecord>> {
    let n = raw.h_ph.len();
    let photon_lengths = [
        raw.lon_ph.len(),
        raw.lat_ph.len(),
        raw.delta_time.len(),
        raw.ocean_conf.len(),
        raw.land_conf.len(),
    ];
    if photon_lengths.iter().any(|&len| len != n) {
        return Err(BathyError::InvalidInput(format!(
            "Photon arrays have inconsistent lengths: h_ph={} others={:?}",
            n, photon_lengths
        )));
    }
    let m = segments.delta_time.len();
    let segment_lengths = [
        segments.geoid.len(),
        segments.geoid_free2mean.len(),
        segments.tide_ocean.len(),
        segments.dac.len(),
        segments.ref_azimuth.len(),
        segments.ref_elev.len(),
        segments.segment_ph_cnt.len(),
    ];
    if segment_lengths.iter().any(|&len| len != m) {
        return Err(BathyError::InvalidInput(format!(
            "Segment arrays have inconsistent lengths: delta_time={} others={:?}",
            m, segment_lengths
        )));
    }

    let lookup = asof_indices(&raw.delta_time, &segments.delta_time);
    let records = (0..n)
        .zip(lookup)
        .map(|(i, seg)| {
            let value = |v: &[f64]| seg.map_or(f64::NAN, |s| v[s]);
            let geoid = value(&segments.geoid);
            let f2m = value(&segments.geoid_free2mean);
            let tide = value(&segments.tide_ocean);
            PhotonRecord {
                x: raw.lon_ph[i],
                y: raw.lat_ph[i],
                z_ellip: raw.h_ph[i],
                z_geoid: raw.h_ph[i] - (geoid + f2m + tide),
                geoid_corr: geoid,
                tide_ocean_corr: tide,
                geof2m_corr: f2m,
                delta_time: raw.delta_time[i],
                oc_sig_conf: raw.ocean_conf[i],
                land_sig_conf: raw.land_conf[i],
                p_vec_az: value(&segments.ref_azimuth),
                p_vec_elev: value(&segments.ref_elev),
                dac_corr: value(&segments.dac),
                ph_count: seg.map_or(0, |s| segments.segment_ph_cnt[s]),
            }
        })
        .collect();
    Ok(records)
}
