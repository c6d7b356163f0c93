#![forbid(unsafe_code)]

#[cfg(test)]
mod tests {
    use minigl_graph::headless::HeadlessBackend;
    use minigl_graph::{Engine, EngineConfig, NodeId, NodeSpec};

    const PASS: &str = "void main() { gl_FragColor = texture(u_src, v_uv); }";
    const MIX: &str =
        "void main() { gl_FragColor = mix(texture(u_a, v_uv), texture(u_b, v_uv), 0.5); }";

    fn build() -> (Engine<HeadlessBackend>, Vec<NodeId>) {
        let mut e = Engine::new(HeadlessBackend::new(), EngineConfig::default()).expect("engine");
        let src = e.create_node("src", NodeSpec::Constant([0.3; 4])).expect("src");
        let blur = e.create_node("blur", NodeSpec::shader(PASS)).expect("blur");
        let trail = e.create_node("trail", NodeSpec::feedback(PASS)).expect("trail");
        let mix = e.create_node("mix", NodeSpec::shader(MIX)).expect("mix");

        e.connect(blur, "u_src", src).expect("blur <- src");
        e.connect(trail, "u_src", blur).expect("trail <- blur");
        e.connect(mix, "u_a", blur).expect("mix.a <- blur");
        e.connect(mix, "u_b", trail).expect("mix.b <- trail");
        e.set_output(Some(mix)).expect("output");
        (e, vec![src, blur, trail, mix])
    }

    /// Determinism contract:
    /// the same graph built twice yields the same order and the same pass sequence.
    #[test]
    fn same_graph_runs_the_same_way() {
        let (mut e1, ids1) = build();
        let (mut e2, ids2) = build();
        assert_eq!(ids1, ids2, "ids are allocated in creation order");

        assert_eq!(e1.order(), e2.order(), "schedule order must be stable");

        for frame in 0..3 {
            let t = frame as f32 * 0.5;
            e1.render(t).expect("render 1");
            e2.render(t).expect("render 2");
        }

        let labels = |e: &Engine<HeadlessBackend>| -> Vec<String> {
            e.backend().passes().iter().map(|p| p.label.clone()).collect()
        };
        assert_eq!(labels(&e1), labels(&e2), "pass sequence must be stable");
        assert_eq!(labels(&e1)[..3], ["blur", "trail", "mix"]);
    }

    /// Rebuilding the schedule without a structural change is not allowed.
    #[test]
    fn schedule_is_reused_across_frames() {
        let (mut e, _) = build();
        e.render(0.0).expect("first frame");
        let rebuilds = e.schedule().rebuilds();
        e.render(0.1).expect("second frame");
        e.render(0.2).expect("third frame");
        assert_eq!(e.schedule().rebuilds(), rebuilds);
    }
}
