use std::f32::consts::TAU;
use std::fs;
use std::path::Path;

use approx::assert_abs_diff_eq;
use hound::{WavSpec, WavWriter};
use ndarray::Axis;

use spectral_ark::{
    compute_spectrogram, read_archive, ArchiveReader, FrameConfig, IndexTable, SpectrogramConfig,
    UtteranceCatalog, WavLoader,
};

fn write_wav(path: &Path, samples: &[i16]) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

fn sine(n: usize, hz: f32) -> Vec<i16> {
    (0..n)
        .map(|i| (8000.0 * (TAU * hz * i as f32 / 16000.0).sin()) as i16)
        .collect()
}

fn kaldi_config() -> SpectrogramConfig {
    SpectrogramConfig {
        frame: FrameConfig { frame_length: 1024, frame_shift: 256, center: false, ..Default::default() },
        ..Default::default()
    }
}

#[test]
fn test_two_utterances() {
    let dir = tempfile::tempdir().unwrap();
    let utt1 = dir.path().join("utt1.wav");
    let utt2 = dir.path().join("utt2.wav");
    write_wav(&utt1, &sine(4096, 1000.0));
    write_wav(&utt2, &sine(512, 1000.0));

    let wav_scp = dir.path().join("wav.scp");
    fs::write(&wav_scp, format!("utt1 {}\nutt2 {}\n", utt1.display(), utt2.display())).unwrap();
    let ark = dir.path().join("feats.ark");
    let scp = dir.path().join("feats.scp");

    let catalog = UtteranceCatalog::open(&wav_scp).unwrap();
    let summary = compute_spectrogram(catalog, WavLoader, &kaldi_config(), &ark, Some(scp.as_path())).unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 0);

    let table = IndexTable::open(&scp).unwrap();
    let keys: Vec<_> = table.entries().iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["utt1", "utt2"]);

    let mut reader = ArchiveReader::new();
    let (key, feats) = reader.read_at(table.get("utt1").unwrap()).unwrap();
    assert_eq!(key, "utt1");
    assert_eq!(feats.dim(), (13, 513));
    // 1 kHz at 16 kHz / 1024 points lands on bin 64
    for frame in feats.axis_iter(Axis(0)) {
        let peak = frame.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(64));
    }

    let (key, feats) = reader.read_at(table.get("utt2").unwrap()).unwrap();
    assert_eq!(key, "utt2");
    assert_eq!(feats.dim(), (0, 513));

    // the archive also reads back without the index
    let records: Vec<_> = read_archive(&ark).unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);
    for ((key, _, offset), entry) in records.iter().zip(table.entries()) {
        assert_eq!(key, &entry.key);
        assert_eq!(*offset, entry.offset);
    }
}

#[test]
fn test_log_power_matches_log_magnitude() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("a.wav");
    write_wav(&wav, &sine(2048, 440.0));
    let wav_scp = dir.path().join("wav.scp");
    fs::write(&wav_scp, format!("a {}\n", wav.display())).unwrap();

    let run = |name: &str, apply_pow: bool| {
        let mut config = kaldi_config();
        config.post.apply_log = true;
        config.post.apply_pow = apply_pow;
        config.post.normalize = true;
        let ark = dir.path().join(name);
        let catalog = UtteranceCatalog::open(&wav_scp).unwrap();
        compute_spectrogram(catalog, WavLoader, &config, &ark, None).unwrap();
        read_archive(&ark).unwrap().next().unwrap().unwrap().1
    };
    let log_mag = run("mag.ark", false);
    let log_pow = run("pow.ark", true);
    assert_eq!(log_mag.dim(), (5, 513));
    assert!(log_pow.iter().all(|x| x.is_finite()));
    // log(m^2) == 2 log(m) wherever m is above the floor
    for (p, m) in log_pow.iter().zip(log_mag.iter()) {
        if *m > -7.0 {
            assert_abs_diff_eq!(*p, 2.0 * *m, epsilon = 1e-3);
        }
    }
}

#[test]
fn test_pipe_sources_and_skips() {
    let dir = tempfile::tempdir().unwrap();
    let wav = dir.path().join("a.wav");
    write_wav(&wav, &sine(1280, 500.0));
    let wav_scp = dir.path().join("wav.scp");
    fs::write(
        &wav_scp,
        format!("piped cat {} |\nmissing {}\n", wav.display(), dir.path().join("nope.wav").display()),
    )
    .unwrap();
    let ark = dir.path().join("feats.ark");
    let catalog = UtteranceCatalog::open(&wav_scp).unwrap();
    let summary = compute_spectrogram(catalog, WavLoader, &kaldi_config(), &ark, None).unwrap();
    assert_eq!((summary.processed, summary.skipped), (1, 1));

    let (key, feats, _) = read_archive(&ark).unwrap().next().unwrap().unwrap();
    assert_eq!(key, "piped");
    assert_eq!(feats.dim(), (2, 513));
}

#[test]
fn test_duplicate_keys_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let short = dir.path().join("short.wav");
    let long = dir.path().join("long.wav");
    write_wav(&short, &sine(1024, 300.0));
    write_wav(&long, &sine(2048, 300.0));
    let wav_scp = dir.path().join("wav.scp");
    fs::write(&wav_scp, format!("x {}\nx {}\n", short.display(), long.display())).unwrap();
    let ark = dir.path().join("feats.ark");
    let scp = dir.path().join("feats.scp");

    let catalog = UtteranceCatalog::open(&wav_scp).unwrap();
    let summary = compute_spectrogram(catalog, WavLoader, &kaldi_config(), &ark, Some(scp.as_path())).unwrap();
    assert_eq!(summary.processed, 2);

    // both records are in the archive and the index
    assert_eq!(read_archive(&ark).unwrap().count(), 2);
    let table = IndexTable::open(&scp).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.num_keys(), 1);
    // a keyed lookup resolves to the later one
    let (_, feats) = ArchiveReader::new().read_at(table.get("x").unwrap()).unwrap();
    assert_eq!(feats.dim(), (5, 513));
}

#[test]
fn test_malformed_catalog_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let wav_scp = dir.path().join("wav.scp");
    fs::write(&wav_scp, "ok a.wav\nbroken\n").unwrap();
    let err = UtteranceCatalog::open(&wav_scp).unwrap_err();
    assert_eq!(err.to_string(), "malformed catalog entry at line 2: expected '<key> <source>'");
}
