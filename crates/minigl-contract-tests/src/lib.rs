#![forbid(unsafe_code)]

#[cfg(test)]
mod determinism;

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::thread;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use minigl_core::{load_engine_config_from, EngineConfig, EngineError, TextureFormat};
    use minigl_graph::headless::{HeadlessBackend, HeadlessTexture};
    use minigl_graph::{
        AssetSource, Engine, LoadState, NodeId, NodeSpec, ShaderProgram, UniformValue,
        DEFAULT_OUTPUT, FEEDBACK_INPUT,
    };
    use minigl_input_media::{RgbaFrame, VideoConfig};

    // ---- Golden fixtures (JSON contracts) ----
    const ENGINE_DEFAULT_JSON: &str = include_str!("../fixtures/engine_default.json");
    const ENGINE_PARTIAL_JSON: &str = include_str!("../fixtures/engine_partial.json");
    const ENGINE_BAD_TARGETS_JSON: &str = include_str!("../fixtures/engine_bad_targets.json");
    const ENGINE_MALFORMED_JSON: &str = include_str!("../fixtures/engine_malformed.json");
    const PROGRAM_UNIFORMS_JSON: &str = include_str!("../fixtures/program_uniforms.json");

    const PASS: &str = "void main() { gl_FragColor = texture(u_src, v_uv); }";
    const LUMINANCE: &str =
        "void main() { float l = dot(texture(u_src, v_uv).rgb, vec3(0.299, 0.587, 0.114)); gl_FragColor = vec4(vec3(l), 1.0); }";
    const DECAY: &str = "void main() { gl_FragColor = texture(previous, v_uv) * 0.95; }";

    fn write_temp_fixture(name: &str, contents: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("minigl_contract_tests_{name}_{ts}.json"));
        fs::write(&p, contents).expect("write fixture");
        p
    }

    fn engine(width: u32, height: u32) -> Engine<HeadlessBackend> {
        let cfg = EngineConfig {
            width,
            height,
            ..EngineConfig::default()
        };
        Engine::new(HeadlessBackend::new(), cfg).expect("headless engine")
    }

    fn tex(e: &Engine<HeadlessBackend>, id: NodeId, output: &str) -> HeadlessTexture {
        e.current_output(id, output)
            .expect("valid output name")
            .expect("node produced")
            .texture
    }

    // ---- Config contracts ----

    #[test]
    fn golden_engine_default_json_loads() {
        let path = write_temp_fixture("engine_default", ENGINE_DEFAULT_JSON);

        let cfg = load_engine_config_from(&path).expect("engine_default.json should load");
        assert_eq!((cfg.width, cfg.height), (640, 360));
        assert_eq!(cfg.texture_format, TextureFormat::Rgba8);
        assert_eq!(cfg.max_color_targets, 4);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_engine_partial_json_fills_defaults() {
        let path = write_temp_fixture("engine_partial", ENGINE_PARTIAL_JSON);

        let cfg = load_engine_config_from(&path).expect("engine_partial.json should load");
        assert_eq!(cfg.width, 256);
        assert_eq!(cfg.height, EngineConfig::default().height);
        assert_eq!(cfg.texture_format, TextureFormat::Rgba16f);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_engine_bad_targets_is_rejected() {
        let path = write_temp_fixture("engine_bad_targets", ENGINE_BAD_TARGETS_JSON);

        let err = load_engine_config_from(&path)
            .expect_err("engine_bad_targets.json must fail (too many targets)");
        assert!(matches!(err, EngineError::InvalidConfig { .. }), "{err}");

        // Keep this stable but not overly strict.
        let msg = err.to_string().to_lowercase();
        assert!(msg.contains("max_color_targets"), "got: {msg}");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_engine_malformed_is_rejected() {
        let path = write_temp_fixture("engine_malformed", ENGINE_MALFORMED_JSON);

        let err = load_engine_config_from(&path).expect_err("engine_malformed.json must fail");
        assert!(matches!(err, EngineError::Json { .. }), "{err}");

        let _ = fs::remove_file(path);
    }

    #[test]
    fn golden_program_uniforms_drive_a_node() {
        let doc: serde_json::Value =
            serde_json::from_str(PROGRAM_UNIFORMS_JSON).expect("program_uniforms.json parses");
        let program: ShaderProgram =
            serde_json::from_value(doc.clone()).expect("program fields deserialize");
        let uniforms: BTreeMap<String, UniformValue> =
            serde_json::from_value(doc["uniforms"].clone()).expect("uniform values deserialize");
        assert_eq!(program.label.as_deref(), Some("colorShift"));
        assert_eq!(uniforms["uShift"], UniformValue::Vec4([0.1, 0.0, 0.0, 0.0]));

        let mut e = engine(32, 32);
        let src = e.create_node("src", NodeSpec::Constant([0.5; 4])).unwrap();
        let shift = e.create_node("shift", NodeSpec::Shader(program)).unwrap();
        e.connect(shift, "u_src", src).unwrap();
        for (name, value) in &uniforms {
            e.update_uniform(shift, name, *value).unwrap();
        }
        e.set_output(Some(shift)).unwrap();
        e.render(0.0).unwrap();

        let pass = &e.backend().passes_for("shift")[0];
        assert_eq!(pass.uniforms.get("uGain"), Some(UniformValue::Float(2.0)));
        assert_eq!(pass.uniforms.get("uInvert"), Some(UniformValue::Bool(true)));
    }

    // ---- Graph contracts ----

    /// X feeds A and B; C reads both. One frame runs every node exactly once, sources
    /// first, and asking for C again in the same frame does nothing.
    #[test]
    fn diamond_is_memoized_per_frame() {
        let mut e = engine(64, 64);
        let x = e.create_node("x", NodeSpec::Constant([1.0, 0.0, 0.0, 1.0])).unwrap();
        let a = e.create_node("a", NodeSpec::shader(PASS)).unwrap();
        let b = e.create_node("b", NodeSpec::shader(PASS)).unwrap();
        let c = e
            .create_node("c", NodeSpec::shader("void main() { gl_FragColor = texture(u_a, v_uv) + texture(u_b, v_uv); }"))
            .unwrap();
        e.connect(a, "u_src", x).unwrap();
        e.connect(b, "u_src", x).unwrap();
        e.connect(c, "u_a", a).unwrap();
        e.connect(c, "u_b", b).unwrap();
        e.set_output(Some(c)).unwrap();

        assert_eq!(e.order(), vec![x, a, b, c]);

        let report = e.render(0.0).unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);
        assert!(report.presented);
        let labels: Vec<&str> = e.backend().passes().iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["a", "b", "c"]);

        let frame = e.frame();
        e.update(c, 0.0, frame).unwrap();
        e.update(a, 0.0, frame).unwrap();
        assert_eq!(e.backend().passes().len(), 3, "same frame must not re-run nodes");

        e.render(0.1).unwrap();
        assert_eq!(e.backend().passes().len(), 6);
    }

    #[test]
    fn disconnect_and_reconnect_are_idempotent() {
        let mut e = engine(16, 16);
        let x = e.create_node("x", NodeSpec::Constant([1.0; 4])).unwrap();
        let a = e.create_node("a", NodeSpec::shader(PASS)).unwrap();

        e.connect(a, "u_src", x).unwrap();
        e.connect(a, "u_src", x).unwrap();
        assert_eq!(e.node(a).unwrap().inputs().len(), 1);
        assert_eq!(e.node(x).unwrap().subscribers().len(), 1);

        e.disconnect(a, "u_src").unwrap();
        e.disconnect(a, "u_src").unwrap();
        assert!(e.node(a).unwrap().inputs().is_empty());
        assert!(e.node(x).unwrap().subscribers().is_empty());

        e.connect(a, "u_src", x).unwrap();
        e.set_output(Some(a)).unwrap();
        e.render(0.0).unwrap();
        let pass = &e.backend().passes_for("a")[0];
        assert_eq!(pass.input("u_src"), Some(tex(&e, x, DEFAULT_OUTPUT)));
    }

    #[test]
    fn cycles_are_refused_and_leave_the_graph_untouched() {
        let mut e = engine(16, 16);
        let a = e.create_node("a", NodeSpec::shader(PASS)).unwrap();
        let b = e.create_node("b", NodeSpec::shader(PASS)).unwrap();
        e.connect(b, "u_src", a).unwrap();

        let err = e.connect(a, "u_src", b).unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected { .. }), "{err}");
        assert!(e.node(a).unwrap().inputs().is_empty());
        assert!(e.node(b).unwrap().subscribers().is_empty());
    }

    // ---- Feedback ----

    #[test]
    fn feedback_alternates_buffers_and_reads_last_frame() {
        let mut e = engine(32, 32);
        let fb = e.create_node("fb", NodeSpec::feedback(DECAY)).unwrap();
        e.set_output(Some(fb)).unwrap();

        let mut written = Vec::new();
        for frame in 0..4 {
            e.render(frame as f32 / 60.0).unwrap();
            let node = e.node(fb).unwrap().as_feedback().unwrap();
            written.push(node.current_index().unwrap());
            let buffers = node.buffers().expect("buffers allocated");
            assert_eq!(
                tex(&e, fb, DEFAULT_OUTPUT),
                buffers[node.current_index().unwrap()].texture,
                "output is the buffer written this frame"
            );
        }
        assert_eq!(written, [0, 1, 0, 1]);

        let passes = e.backend().passes_for("fb");
        assert_eq!(passes.len(), 4);
        for pair in passes.windows(2) {
            assert_eq!(
                pair[1].input(FEEDBACK_INPUT),
                Some(pair[0].targets[0]),
                "each frame samples the previous frame's target"
            );
        }

        // First frame reads a history buffer cleared to transparent.
        let first_read = passes[0].input(FEEDBACK_INPUT).unwrap();
        assert_eq!(
            e.backend().texture(first_read).unwrap().last_clear,
            Some([0.0; 4])
        );
    }

    #[test]
    fn feedback_resize_recreates_both_buffers() {
        let mut e = engine(64, 64);
        let fb = e
            .create_node_sized("fb", NodeSpec::feedback(DECAY), 512, 512)
            .unwrap();
        e.set_output(Some(fb)).unwrap();
        e.render(0.0).unwrap();
        e.render(0.1).unwrap();

        let old: Vec<HeadlessTexture> = {
            let node = e.node(fb).unwrap().as_feedback().unwrap();
            assert!(node.is_initialized());
            node.buffers().unwrap().iter().map(|b| b.texture).collect()
        };

        e.resize_node(fb, 256, 256).unwrap();

        let node = e.node(fb).unwrap().as_feedback().unwrap();
        assert!(!node.is_initialized(), "resize restarts the bootstrap");
        assert_eq!(node.current_index(), None);
        let buffers = node.buffers().unwrap();
        for buffer in buffers.iter() {
            assert_eq!(buffer.size(), (256, 256));
            assert!(!old.contains(&buffer.texture));
            assert_eq!(e.backend().texture(buffer.texture).unwrap().last_clear, Some([0.0; 4]));
        }
        for t in old {
            assert!(!e.backend().texture(t).unwrap().alive, "old buffers are released");
        }

        e.render(0.2).unwrap();
        let node = e.node(fb).unwrap().as_feedback().unwrap();
        assert_eq!(node.current_index(), Some(0));
        assert_eq!(e.node(fb).unwrap().size(), (256, 256));
    }

    #[test]
    fn failed_feedback_frame_keeps_the_last_good_history() {
        let mut e = engine(16, 16);
        e.backend_mut().fail_compiles_containing("BROKEN");
        let fb = e.create_node("fb", NodeSpec::feedback(DECAY)).unwrap();
        e.set_output(Some(fb)).unwrap();

        e.render(0.0).unwrap();
        let good = tex(&e, fb, DEFAULT_OUTPUT);

        e.set_program(fb, ShaderProgram::fragment("BROKEN")).unwrap();
        let report = e.render(0.1).unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            e.node(fb).unwrap().as_feedback().unwrap().current_index(),
            Some(0),
            "a failed draw does not advance the buffers"
        );

        e.set_program(fb, ShaderProgram::fragment(DECAY)).unwrap();
        let report = e.render(0.2).unwrap();
        assert!(report.is_clean());

        let pass = e.backend().passes_for("fb").last().cloned().unwrap();
        assert_eq!(pass.input(FEEDBACK_INPUT), Some(good), "history is the last good frame");
        assert_ne!(pass.targets[0], good);
        assert_eq!(tex(&e, fb, DEFAULT_OUTPUT), pass.targets[0]);
    }

    // ---- Multiple render targets ----

    #[test]
    fn multi_output_writes_all_targets_in_one_pass() {
        let mut e = engine(32, 16);
        let src = e.create_node("src", NodeSpec::Constant([0.2; 4])).unwrap();
        let mrt = e
            .create_node(
                "split",
                NodeSpec::multi_output("void main() { o0 = texture(u_src, v_uv); o1 = o0.rrra; o2 = o0.ggga; }", 3),
            )
            .unwrap();
        let view = e.create_node("view", NodeSpec::shader(PASS)).unwrap();
        e.connect(mrt, "u_src", src).unwrap();
        e.connect_output(view, "u_src", mrt, "2").unwrap();
        e.set_output(Some(view)).unwrap();

        e.render(0.0).unwrap();

        let passes = e.backend().passes_for("split");
        assert_eq!(passes.len(), 1, "one pass for all targets");
        assert_eq!(passes[0].targets.len(), 3);

        let outputs: Vec<HeadlessTexture> =
            ["0", "1", "2"].iter().map(|o| tex(&e, mrt, o)).collect();
        assert_eq!(outputs, passes[0].targets);
        assert_eq!(tex(&e, mrt, DEFAULT_OUTPUT), outputs[0]);
        assert_eq!(e.backend().passes_for("view")[0].input("u_src"), Some(outputs[2]));

        let err = e.current_output(mrt, "3").unwrap_err();
        assert!(matches!(err, EngineError::OutputOutOfRange { count: 3, .. }), "{err}");
        let err = e.connect_output(view, "u_src", mrt, "3").unwrap_err();
        assert!(matches!(err, EngineError::OutputOutOfRange { .. }), "{err}");
    }

    #[test]
    fn multi_output_target_cap_is_enforced() {
        let mut e = engine(16, 16);
        let err = e
            .create_node("wide", NodeSpec::multi_output(PASS, 5))
            .unwrap_err();
        assert!(matches!(err, EngineError::TooManyTargets { requested: 5, max: 4 }), "{err}");
        assert!(e.is_empty());
    }

    // ---- Assets ----

    fn render_until_loaded(e: &mut Engine<HeadlessBackend>, asset: NodeId) -> LoadState {
        let mut t = 0.0;
        for _ in 0..500 {
            e.render(t).unwrap();
            t += 1.0 / 60.0;
            match e.load_state(asset).unwrap() {
                LoadState::Loading => thread::sleep(Duration::from_millis(5)),
                done => return done,
            }
        }
        e.load_state(asset).unwrap()
    }

    fn write_png(name: &str, width: u32, height: u32) -> PathBuf {
        let mut p = std::env::temp_dir();
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        p.push(format!("minigl_contract_tests_{name}_{ts}.png"));
        image::RgbaImage::from_pixel(width, height, image::Rgba([200, 120, 40, 255]))
            .save(&p)
            .expect("write png");
        p
    }

    /// Image -> luminance -> color shift: the chain runs at the image's native size.
    #[test]
    fn image_chain_runs_at_native_size() {
        let png = write_png("chain", 40, 20);

        let mut e = engine(128, 128);
        let img = e
            .create_node("image", NodeSpec::Asset(AssetSource::Image(png.clone())))
            .unwrap();
        let lum = e.create_node("luminance", NodeSpec::shader(LUMINANCE)).unwrap();
        let shift = e.create_node("shift", NodeSpec::shader(PASS)).unwrap();
        e.connect(lum, "u_src", img).unwrap();
        e.connect(shift, "u_src", lum).unwrap();
        e.update_uniform(shift, "uShift", UniformValue::Vec3([0.1, 0.0, 0.0]))
            .unwrap();
        e.set_output(Some(shift)).unwrap();

        assert_eq!(render_until_loaded(&mut e, img), LoadState::Loaded);
        e.backend_mut().clear_passes();
        e.render(10.0).unwrap();

        assert_eq!(e.node(img).unwrap().size(), (40, 20));
        for label in ["luminance", "shift"] {
            let pass = &e.backend().passes_for(label)[0];
            assert_eq!((pass.width, pass.height), (40, 20), "{label} runs at native size");
        }
        assert_eq!(e.backend().presented().last().map(|p| (p.1, p.2)), Some((40, 20)));

        let _ = fs::remove_file(png);
    }

    #[test]
    fn missing_image_fails_without_stopping_the_frame() {
        let mut e = engine(32, 32);
        let img = e
            .create_node(
                "missing",
                NodeSpec::Asset(AssetSource::Image(Path::new("/definitely/not/here.png").into())),
            )
            .unwrap();
        let view = e.create_node("view", NodeSpec::shader(PASS)).unwrap();
        e.connect(view, "u_src", img).unwrap();
        e.set_output(Some(view)).unwrap();

        let state = render_until_loaded(&mut e, img);
        assert!(matches!(state, LoadState::Error(_)), "{state:?}");

        // The consumer still draws, sampling the empty texture at surface size.
        let report = e.render(1.0).unwrap();
        assert!(report.presented);
        let pass = e.backend().passes_for("view").last().cloned().unwrap();
        assert_eq!((pass.width, pass.height), (32, 32));
        let bound = pass.input("u_src").unwrap();
        assert_eq!(e.backend().texture(bound).unwrap().width, 1);
    }

    #[test]
    fn pixel_asset_uploads_once() {
        let mut e = engine(32, 32);
        let img = e
            .create_node(
                "pixels",
                NodeSpec::Asset(AssetSource::Pixels(RgbaFrame::solid(8, 4, [255, 0, 0, 255]))),
            )
            .unwrap();
        e.set_output(Some(img)).unwrap();

        e.render(0.0).unwrap();
        e.render(0.1).unwrap();
        e.render(0.2).unwrap();

        assert_eq!(e.load_state(img).unwrap(), LoadState::Loaded);
        let asset = e.node(img).unwrap().as_asset().unwrap();
        assert_eq!(asset.upload_count(), 1);
        assert!(!asset.is_dirty());
        let t = tex(&e, img, DEFAULT_OUTPUT);
        assert_eq!(e.backend().texture(t).unwrap().uploads, 1);
    }

    #[test]
    fn bad_video_config_surfaces_as_asset_error() {
        let mut e = engine(16, 16);
        let cfg = VideoConfig {
            width: 320,
            height: 240,
            fps: 30,
            file: "   ".to_string(),
            r#loop: true,
            ffmpeg_path: None,
        };
        let video = e
            .create_node("video", NodeSpec::Asset(AssetSource::Video(cfg)))
            .expect("asset failures are node-local");
        assert!(matches!(e.load_state(video).unwrap(), LoadState::Error(_)));

        let err = e.reload_asset(video).unwrap_err();
        assert!(matches!(err, EngineError::Asset(_)), "{err}");
        assert!(e.current_output(video, DEFAULT_OUTPUT).unwrap().is_none());
    }

    #[test]
    fn missing_ffmpeg_surfaces_as_asset_error() {
        let mut e = engine(16, 16);
        let cfg = VideoConfig {
            width: 8,
            height: 8,
            fps: 30,
            file: "clip.mp4".to_string(),
            r#loop: true,
            ffmpeg_path: Some("/no/such/dir/ffmpeg".to_string()),
        };
        let video = e
            .create_node("video", NodeSpec::Asset(AssetSource::Video(cfg)))
            .unwrap();
        e.set_output(Some(video)).unwrap();
        assert_eq!(e.load_state(video).unwrap(), LoadState::Loading);

        match render_until_loaded(&mut e, video) {
            LoadState::Error(msg) => assert!(msg.contains("ffmpeg not found"), "{msg}"),
            other => panic!("expected a load error, got {other:?}"),
        }
        assert!(e.current_output(video, DEFAULT_OUTPUT).unwrap().is_none());
        assert!(e.render(1.0).unwrap().is_clean(), "the error is not re-reported");
    }

    #[test]
    fn disposing_a_loading_image_leaves_nothing_behind() {
        let png = write_png("disposed", 1024, 1024);

        let mut e = engine(16, 16);
        let out = e.create_node("out", NodeSpec::Constant([0.0, 0.0, 1.0, 1.0])).unwrap();
        e.set_output(Some(out)).unwrap();
        e.render(0.0).unwrap();
        let baseline = e.backend().live_textures();

        let img = e
            .create_node("image", NodeSpec::Asset(AssetSource::Image(png.clone())))
            .unwrap();
        assert_eq!(e.load_state(img).unwrap(), LoadState::Loading);
        e.dispose(img).unwrap();

        for frame in 1..20 {
            let report = e.render(frame as f32 / 60.0).unwrap();
            assert!(report.is_clean(), "{:?}", report.failures);
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!e.contains(img));
        assert!(matches!(e.load_state(img), Err(EngineError::NodeNotFound(_))));
        assert_eq!(e.backend().live_textures(), baseline);
        assert!(e.backend().passes_for("image").is_empty());

        let _ = fs::remove_file(png);
    }

    // ---- Proxies ----

    /// A proxy wraps A -> B. Mapping its `glTexture` input onto A means connecting X
    /// to the proxy feeds X into A.
    #[test]
    fn proxy_input_reaches_internal_node() {
        let mut e = engine(32, 32);
        let x = e.create_node("x", NodeSpec::Constant([0.0, 1.0, 0.0, 1.0])).unwrap();
        let a = e
            .create_node("a", NodeSpec::shader("void main() { gl_FragColor = texture(glTexture, v_uv); }"))
            .unwrap();
        let b = e.create_node("b", NodeSpec::shader(PASS)).unwrap();
        e.connect(b, "u_src", a).unwrap();
        let p = e
            .create_node("group", NodeSpec::Proxy { internal: vec![a, b], output: b })
            .unwrap();
        e.map_input(p, "glTexture", a).unwrap();
        e.map_uniform_as(p, "amount", b, "uAmount").unwrap();

        e.connect(p, "glTexture", x).unwrap();
        assert_eq!(e.node(a).unwrap().input("glTexture").unwrap().source, x);
        assert!(e.node(p).unwrap().inputs().is_empty());

        e.update_uniform(p, "amount", UniformValue::Float(0.25)).unwrap();
        assert_eq!(
            e.node(b).unwrap().shader().unwrap().uniform("uAmount"),
            Some(UniformValue::Float(0.25))
        );

        e.set_output(Some(p)).unwrap();
        assert_eq!(e.order(), vec![x, p]);
        let report = e.render(0.0).unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);

        let pass_a = &e.backend().passes_for("a")[0];
        assert_eq!(pass_a.input("glTexture"), Some(tex(&e, x, DEFAULT_OUTPUT)));
        assert_eq!(tex(&e, p, DEFAULT_OUTPUT), tex(&e, b, DEFAULT_OUTPUT));
    }

    #[test]
    fn disposing_a_proxy_disposes_its_members() {
        let mut e = engine(16, 16);
        let a = e.create_node("a", NodeSpec::shader(PASS)).unwrap();
        let p = e
            .create_node("group", NodeSpec::Proxy { internal: vec![a], output: a })
            .unwrap();
        e.set_output(Some(p)).unwrap();
        e.render(0.0).unwrap();

        e.dispose(p).unwrap();
        assert!(!e.contains(a));
        assert!(e.is_empty());
        assert!(matches!(e.dispose(p), Err(EngineError::NodeNotFound(_))));
        assert_eq!(e.backend().live_pipelines(), 0);
    }
}
